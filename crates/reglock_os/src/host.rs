#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::Value;

use reglock_engines::lock_enforcer::SettingInterceptor;
use reglock_engines::mutation_guard::UserMutationGuard;
use reglock_kernel_contracts::guard::GuardReject;
use reglock_kernel_contracts::snapshot::{DirectoryUser, UserId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("setting {key} could not be read")]
    Unreadable { key: String },
    #[error("setting {key} is intercepted and cannot be written")]
    Intercepted { key: String },
    #[error("setting {key} could not be written")]
    WriteFailed { key: String },
    #[error("user {0} does not exist")]
    UnknownUser(UserId),
    #[error("mutation rejected: {}", .0.violation)]
    Rejected(GuardReject),
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Site settings as the host exposes them.
pub trait HostSettings {
    /// Read through whatever interceptors are installed. `Ok(None)` means no
    /// stored value exists.
    fn read_setting(&self, key: &str) -> Result<Option<Value>, HostError>;
    fn write_setting(&mut self, key: &str, value: Value) -> Result<(), HostError>;
    /// Site URL after host-side filtering.
    fn resolved_site_url(&self) -> Option<String>;
    fn resolved_home_url(&self) -> Option<String>;
}

pub trait UserDirectory {
    fn all_users(&self) -> Result<Vec<DirectoryUser>, HostError>;
    fn user_meta(&self, user_id: UserId, key: &str) -> Option<Value>;
}

pub trait RoleRegistry {
    /// Adds a role with no capabilities. `false` when it already exists.
    fn add_role(&mut self, name: &str, display_name: &str) -> Result<bool, HostError>;
    fn remove_role(&mut self, name: &str) -> Result<bool, HostError>;
}

/// Extension point for the lock's read interceptor and user mutation guard.
/// Installing replaces whatever occupied the slot.
pub trait InterceptorHost {
    fn install_setting_interceptor(&mut self, interceptor: Arc<dyn SettingInterceptor>);
    fn remove_setting_interceptor(&mut self) -> Option<Arc<dyn SettingInterceptor>>;
    fn has_setting_interceptor(&self) -> bool;
    fn install_user_guard(&mut self, guard: Arc<dyn UserMutationGuard>);
    fn remove_user_guard(&mut self) -> Option<Arc<dyn UserMutationGuard>>;
}

/// Everything the lifecycle drives on a host.
pub trait Host: HostSettings + UserDirectory + RoleRegistry + InterceptorHost {}

impl<T: HostSettings + UserDirectory + RoleRegistry + InterceptorHost + ?Sized> Host for T {}

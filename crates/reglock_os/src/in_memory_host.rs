#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use reglock_engines::lock_enforcer::SettingInterceptor;
use reglock_engines::mutation_guard::UserMutationGuard;
use reglock_kernel_contracts::guard::{
    GuardFlag, GuardOutcome, MetaUpdateDecision, UserMeta, UserMetaInsertRequest,
    UserMetaUpdateRequest, UserPersistRequest, UserRecordFields,
};
use reglock_kernel_contracts::settings::{display_value, SETTING_HOME, SETTING_SITEURL};
use reglock_kernel_contracts::snapshot::{DirectoryUser, UserId};

use crate::host::{HostError, HostSettings, InterceptorHost, RoleRegistry, UserDirectory};

/// Reference host used by tests and embedding demos. Reads honour the
/// installed interceptor, writes to an intercepted key fail, and user
/// mutations are routed through the installed guard.
#[derive(Default)]
pub struct InMemoryHost {
    settings: BTreeMap<String, Value>,
    unreadable: BTreeSet<String>,
    failing_writes: BTreeSet<String>,
    directory_unavailable: bool,
    site_url_override: Option<String>,
    home_url_override: Option<String>,
    users: BTreeMap<UserId, DirectoryUser>,
    meta: BTreeMap<UserId, UserMeta>,
    roles: BTreeMap<String, String>,
    next_user_id: u64,
    setting_interceptor: Option<Arc<dyn SettingInterceptor>>,
    user_guard: Option<Arc<dyn UserMutationGuard>>,
    observed_flags: Vec<GuardFlag>,
}

impl InMemoryHost {
    pub fn new_in_memory() -> Self {
        Self {
            next_user_id: 1,
            ..Self::default()
        }
    }

    pub fn seed_setting(&mut self, key: &str, value: Value) {
        self.settings.insert(key.to_string(), value);
    }

    /// Stored value with no interceptor applied.
    pub fn stored_setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn set_unreadable(&mut self, key: &str, unreadable: bool) {
        if unreadable {
            self.unreadable.insert(key.to_string());
        } else {
            self.unreadable.remove(key);
        }
    }

    pub fn set_failing_write(&mut self, key: &str, failing: bool) {
        if failing {
            self.failing_writes.insert(key.to_string());
        } else {
            self.failing_writes.remove(key);
        }
    }

    pub fn set_directory_unavailable(&mut self, unavailable: bool) {
        self.directory_unavailable = unavailable;
    }

    /// Simulates a host-side filter on the resolved URLs.
    pub fn override_resolved_urls(&mut self, site_url: Option<String>, home_url: Option<String>) {
        self.site_url_override = site_url;
        self.home_url_override = home_url;
    }

    /// Adds an account directly, bypassing the guard.
    pub fn seed_user(&mut self, user: DirectoryUser, meta: UserMeta) {
        self.next_user_id = self.next_user_id.max(user.user_id.0 + 1);
        self.meta.insert(user.user_id, meta);
        self.users.insert(user.user_id, user);
    }

    pub fn user(&self, user_id: UserId) -> Option<&DirectoryUser> {
        self.users.get(&user_id)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn has_user_guard(&self) -> bool {
        self.user_guard.is_some()
    }

    pub fn observed_flags(&self) -> &[GuardFlag] {
        &self.observed_flags
    }

    pub fn create_user(&mut self, fields: UserRecordFields) -> Result<UserId, HostError> {
        let req = UserPersistRequest::create_v1(fields, BTreeMap::new());
        let fields = self.run_persist_guard(&req)?;
        let user_id = UserId(self.next_user_id);
        self.next_user_id += 1;
        let user = DirectoryUser {
            user_id,
            login: fields.login.unwrap_or_default(),
            password_hash: fields.password_hash.unwrap_or_default(),
            email: fields.email.unwrap_or_default(),
            registered_at: fields.registered_at.unwrap_or_default(),
            roles: Vec::new(),
            capabilities: BTreeMap::new(),
            effective_capabilities: BTreeMap::new(),
        };
        self.users.insert(user_id, user);
        self.meta.insert(user_id, UserMeta::new());
        Ok(user_id)
    }

    pub fn update_user(&mut self, user_id: UserId, fields: UserRecordFields) -> Result<(), HostError> {
        if !self.users.contains_key(&user_id) {
            return Err(HostError::UnknownUser(user_id));
        }
        let req = UserPersistRequest::update_v1(user_id, fields, BTreeMap::new())
            .map_err(|_| HostError::UnknownUser(user_id))?;
        let fields = self.run_persist_guard(&req)?;
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(HostError::UnknownUser(user_id))?;
        if let Some(v) = fields.login {
            user.login = v;
        }
        if let Some(v) = fields.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = fields.email {
            user.email = v;
        }
        if let Some(v) = fields.registered_at {
            user.registered_at = v;
        }
        Ok(())
    }

    /// Bulk metadata write as performed on account save. Returns the batch
    /// that was actually stored.
    pub fn insert_user_meta(
        &mut self,
        user_id: UserId,
        meta: UserMeta,
        is_update: Option<bool>,
    ) -> Result<UserMeta, HostError> {
        let req = UserMetaInsertRequest {
            meta,
            user_id,
            is_update,
            raw_input: BTreeMap::new(),
        };
        let meta = match &self.user_guard {
            None => req.meta,
            Some(guard) => match guard.pre_insert_user_meta(&req) {
                GuardOutcome::Proceed { data, flags } => {
                    self.observed_flags.extend(flags);
                    data
                }
                GuardOutcome::Reject(reject) => return Err(HostError::Rejected(reject)),
            },
        };
        let stored = self.meta.entry(user_id).or_default();
        for (k, v) in &meta {
            stored.insert(k.clone(), v.clone());
        }
        Ok(meta)
    }

    /// Single-key metadata update. A guard answer of `Some(check)` short-circuits
    /// the write and is returned as-is.
    pub fn update_user_meta(&mut self, user_id: UserId, key: &str, value: Value) -> Result<bool, HostError> {
        if !self.users.contains_key(&user_id) {
            return Err(HostError::UnknownUser(user_id));
        }
        if let Some(guard) = &self.user_guard {
            let req = UserMetaUpdateRequest {
                object_id: user_id,
                meta_key: key.to_string(),
                meta_value: value.clone(),
                default_check: None,
            };
            match guard.pre_update_user_meta(&req) {
                MetaUpdateDecision::Reject(reject) => return Err(HostError::Rejected(reject)),
                MetaUpdateDecision::Allow { check, flags } => {
                    self.observed_flags.extend(flags);
                    if let Some(check) = check {
                        return Ok(check);
                    }
                }
            }
        }
        self.meta
            .entry(user_id)
            .or_default()
            .insert(key.to_string(), value);
        Ok(true)
    }

    fn run_persist_guard(&mut self, req: &UserPersistRequest) -> Result<UserRecordFields, HostError> {
        let Some(guard) = &self.user_guard else {
            return Ok(req.fields.clone());
        };
        match guard.pre_persist_user(req) {
            GuardOutcome::Proceed { data, flags } => {
                self.observed_flags.extend(flags);
                Ok(data)
            }
            GuardOutcome::Reject(reject) => Err(HostError::Rejected(reject)),
        }
    }

    fn intercepts(&self, key: &str) -> Option<&Arc<dyn SettingInterceptor>> {
        self.setting_interceptor
            .as_ref()
            .filter(|i| i.intercepted_settings().iter().any(|k| *k == key))
    }

    fn resolved_url(&self, key: &str, override_url: &Option<String>) -> Option<String> {
        if override_url.is_some() {
            return override_url.clone();
        }
        self.settings.get(key).map(|v| display_value(Some(v)))
    }
}

impl HostSettings for InMemoryHost {
    fn read_setting(&self, key: &str) -> Result<Option<Value>, HostError> {
        if self.unreadable.contains(key) {
            return Err(HostError::Unreadable {
                key: key.to_string(),
            });
        }
        let stored = self.settings.get(key);
        match self.intercepts(key) {
            Some(i) => Ok(Some(match stored {
                Some(v) => i.on_stored_value(key, v),
                None => i.on_default_value(key, None),
            })),
            None => Ok(stored.cloned()),
        }
    }

    fn write_setting(&mut self, key: &str, value: Value) -> Result<(), HostError> {
        if self.intercepts(key).is_some() {
            return Err(HostError::Intercepted {
                key: key.to_string(),
            });
        }
        if self.failing_writes.contains(key) {
            return Err(HostError::WriteFailed {
                key: key.to_string(),
            });
        }
        self.settings.insert(key.to_string(), value);
        Ok(())
    }

    fn resolved_site_url(&self) -> Option<String> {
        self.resolved_url(SETTING_SITEURL, &self.site_url_override)
    }

    fn resolved_home_url(&self) -> Option<String> {
        self.resolved_url(SETTING_HOME, &self.home_url_override)
    }
}

impl UserDirectory for InMemoryHost {
    fn all_users(&self) -> Result<Vec<DirectoryUser>, HostError> {
        if self.directory_unavailable {
            return Err(HostError::Unavailable("user directory".to_string()));
        }
        Ok(self.users.values().cloned().collect())
    }

    fn user_meta(&self, user_id: UserId, key: &str) -> Option<Value> {
        self.meta.get(&user_id)?.get(key).cloned()
    }
}

impl RoleRegistry for InMemoryHost {
    fn add_role(&mut self, name: &str, display_name: &str) -> Result<bool, HostError> {
        if self.roles.contains_key(name) {
            return Ok(false);
        }
        self.roles.insert(name.to_string(), display_name.to_string());
        Ok(true)
    }

    fn remove_role(&mut self, name: &str) -> Result<bool, HostError> {
        Ok(self.roles.remove(name).is_some())
    }
}

impl InterceptorHost for InMemoryHost {
    fn install_setting_interceptor(&mut self, interceptor: Arc<dyn SettingInterceptor>) {
        debug!(settings = ?interceptor.intercepted_settings(), "setting interceptor installed");
        self.setting_interceptor = Some(interceptor);
    }

    fn remove_setting_interceptor(&mut self) -> Option<Arc<dyn SettingInterceptor>> {
        self.setting_interceptor.take()
    }

    fn has_setting_interceptor(&self) -> bool {
        self.setting_interceptor.is_some()
    }

    fn install_user_guard(&mut self, guard: Arc<dyn UserMutationGuard>) {
        self.user_guard = Some(guard);
    }

    fn remove_user_guard(&mut self) -> Option<Arc<dyn UserMutationGuard>> {
        self.user_guard.take()
    }
}

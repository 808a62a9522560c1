#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reglock_kernel_contracts::settings::{SETTING_DEFAULT_ROLE, SETTING_USERS_CAN_REGISTER};
use reglock_kernel_contracts::{ContractViolation, Validate};

/// Role forced onto new signups while the lock is engaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockedRole {
    /// Zero-capability role created and removed by the lifecycle.
    Dedicated { name: String, display_name: String },
    /// Pre-existing host role; never created or removed.
    BuiltIn { name: String },
}

impl LockedRole {
    pub fn name(&self) -> &str {
        match self {
            LockedRole::Dedicated { name, .. } | LockedRole::BuiltIn { name } => name,
        }
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self, LockedRole::Dedicated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEnforcerConfig {
    pub locked_role: LockedRole,
}

impl LockEnforcerConfig {
    pub fn mvp_v1() -> Self {
        Self {
            locked_role: LockedRole::Dedicated {
                name: "user-registration-lock".to_string(),
                display_name: "User Registration Locked".to_string(),
            },
        }
    }
}

impl Validate for LockEnforcerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let name = self.locked_role.name();
        if name.trim().is_empty() || name.len() > 64 || !name.is_ascii() {
            return Err(ContractViolation::InvalidValue {
                field: "lock_enforcer_config.locked_role",
                reason: "must be a non-empty ASCII role name of <= 64 bytes",
            });
        }
        if let LockedRole::Dedicated { display_name, .. } = &self.locked_role {
            if display_name.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "lock_enforcer_config.locked_role.display_name",
                    reason: "must not be empty",
                });
            }
        }
        Ok(())
    }
}

/// Read-side hook the host consults whenever it resolves a setting.
pub trait SettingInterceptor: Send + Sync {
    fn intercepted_settings(&self) -> &'static [&'static str];
    /// A stored value exists.
    fn on_stored_value(&self, key: &str, stored: &Value) -> Value;
    /// No stored value; `default` is the host's own fallback.
    fn on_default_value(&self, key: &str, default: Option<&Value>) -> Value;
}

#[derive(Debug, Clone)]
pub struct LockEnforcer {
    config: LockEnforcerConfig,
}

impl LockEnforcer {
    pub fn new(config: LockEnforcerConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn locked_role(&self) -> &LockedRole {
        &self.config.locked_role
    }

    pub fn resolve_registration_allowed(&self, _underlying: Option<&Value>) -> bool {
        false
    }

    pub fn resolve_default_role(&self, _underlying: Option<&Value>) -> &str {
        self.config.locked_role.name()
    }

    fn resolve(&self, key: &str, underlying: Option<&Value>) -> Option<Value> {
        match key {
            SETTING_USERS_CAN_REGISTER => {
                Some(Value::Bool(self.resolve_registration_allowed(underlying)))
            }
            SETTING_DEFAULT_ROLE => Some(Value::String(
                self.resolve_default_role(underlying).to_string(),
            )),
            _ => None,
        }
    }
}

impl SettingInterceptor for LockEnforcer {
    fn intercepted_settings(&self) -> &'static [&'static str] {
        &[SETTING_USERS_CAN_REGISTER, SETTING_DEFAULT_ROLE]
    }

    fn on_stored_value(&self, key: &str, stored: &Value) -> Value {
        self.resolve(key, Some(stored))
            .unwrap_or_else(|| stored.clone())
    }

    fn on_default_value(&self, key: &str, default: Option<&Value>) -> Value {
        self.resolve(key, default)
            .unwrap_or_else(|| default.cloned().unwrap_or(Value::Null))
    }
}

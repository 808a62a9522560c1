#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::PluginVersion;
use crate::{ContractViolation, UnixTimeSecs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    /// LockConfig exists but the remaining setup steps have not all completed.
    SetupInProgress,
    #[default]
    Active,
    /// Torn down without purge; the next activation recaptures the baseline.
    Deactivated,
}

/// Values observed immediately before the lock engaged. `None` means the host
/// had no stored value, which on restore means "leave untouched".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockBaseline {
    #[serde(
        rename = "save_users_can_register",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub users_can_register: Option<Value>,
    #[serde(
        rename = "save_default_role",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_role: Option<Value>,
    #[serde(
        rename = "save_admin_email",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub admin_email: Option<Value>,
    #[serde(rename = "save_siteurl", default, skip_serializing_if = "Option::is_none")]
    pub siteurl: Option<Value>,
    #[serde(rename = "save_home", default, skip_serializing_if = "Option::is_none")]
    pub home: Option<Value>,
    #[serde(rename = "save_site_url", default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(rename = "save_home_url", default, skip_serializing_if = "Option::is_none")]
    pub home_url: Option<String>,
}

/// The single structured ConfigStore entry owned by the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(rename = "version", default)]
    pub schema_version: Option<String>,
    #[serde(rename = "db_version", default)]
    pub db_schema_version: Option<String>,
    #[serde(rename = "last_run", default)]
    pub last_audit_run: Option<UnixTimeSecs>,
    #[serde(default)]
    pub setup_state: SetupState,
    #[serde(default = "first_generation")]
    pub snapshot_generation: u32,
    #[serde(default)]
    pub snapshot_digest: Option<String>,
    #[serde(flatten)]
    pub baseline: LockBaseline,
    /// Sub-keys written by other versions; preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn first_generation() -> u32 {
    1
}

impl LockConfig {
    /// First record written for an installation. The db schema marker stays
    /// absent until the snapshot table is actually created.
    pub fn begin_setup(version: &PluginVersion, baseline: LockBaseline) -> Self {
        Self {
            schema_version: Some(version.as_str().to_string()),
            db_schema_version: None,
            last_audit_run: None,
            setup_state: SetupState::SetupInProgress,
            snapshot_generation: 1,
            snapshot_digest: None,
            baseline,
            extra: BTreeMap::new(),
        }
    }

    pub fn needs_migration(&self, running: &PluginVersion) -> bool {
        running.supersedes(self.schema_version.as_deref())
            || running.supersedes(self.db_schema_version.as_deref())
    }

    pub fn audit_due(&self, now: UnixTimeSecs, interval_secs: u64) -> bool {
        match self.last_audit_run {
            None => true,
            Some(last) => now.secs_since(last) >= interval_secs,
        }
    }

    pub fn to_value(&self) -> Result<Value, ContractViolation> {
        serde_json::to_value(self).map_err(|_| ContractViolation::InvalidValue {
            field: "lock_config",
            reason: "failed to encode",
        })
    }

    pub fn from_value(value: Value) -> Result<Self, ContractViolation> {
        if !value.is_object() {
            return Err(ContractViolation::InvalidValue {
                field: "lock_config",
                reason: "must be a structured mapping",
            });
        }
        let cfg: Self = serde_json::from_value(value).map_err(|_| {
            ContractViolation::InvalidValue {
                field: "lock_config",
                reason: "failed to decode",
            }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }
}

impl Validate for LockConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(digest) = &self.snapshot_digest {
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ContractViolation::InvalidValue {
                    field: "lock_config.snapshot_digest",
                    reason: "must be 64 hex characters",
                });
            }
        }
        if self.snapshot_generation == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "lock_config.snapshot_generation",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

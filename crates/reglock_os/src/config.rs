#![forbid(unsafe_code)]

use reglock_engines::drift::DriftAuditConfig;
use reglock_engines::lock_enforcer::LockEnforcerConfig;
use reglock_engines::mutation_guard::MutationGuardConfig;
use reglock_kernel_contracts::version::PluginVersion;
use reglock_kernel_contracts::{ContractViolation, Validate};

/// Everything the lifecycle needs, passed explicitly at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RegLockConfig {
    /// ConfigStore key holding the single LockConfig mapping.
    pub option_name: String,
    /// Version of the running code; also the snapshot table shape version.
    pub code_version: String,
    pub lock_enforcer: LockEnforcerConfig,
    pub mutation_guard: MutationGuardConfig,
    pub drift_audit: DriftAuditConfig,
}

impl RegLockConfig {
    pub fn mvp_v1(meta_prefix: &str) -> Self {
        Self {
            option_name: "user-registration-lock".to_string(),
            code_version: "1.0.0".to_string(),
            lock_enforcer: LockEnforcerConfig::mvp_v1(),
            mutation_guard: MutationGuardConfig::mvp_v1(meta_prefix),
            drift_audit: DriftAuditConfig::mvp_v1(),
        }
    }

    pub fn plugin_version(&self) -> Result<PluginVersion, ContractViolation> {
        PluginVersion::new(self.code_version.clone())
    }
}

impl Validate for RegLockConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.option_name.trim().is_empty()
            || self.option_name.len() > 191
            || !self.option_name.is_ascii()
        {
            return Err(ContractViolation::InvalidValue {
                field: "reglock_config.option_name",
                reason: "must be a non-empty ASCII key of <= 191 bytes",
            });
        }
        self.plugin_version()?;
        self.lock_enforcer.validate()?;
        self.mutation_guard.validate()?;
        self.drift_audit.validate()?;
        Ok(())
    }
}

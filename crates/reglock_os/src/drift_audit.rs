#![forbid(unsafe_code)]

use serde_json::Value;
use tracing::{info, warn};

use reglock_engines::drift::{DriftAuditRuntime, LockSettingCheck, SiteIdentity};
use reglock_kernel_contracts::lockcfg::LockConfig;
use reglock_kernel_contracts::notice::{Notice, NoticeSeverity};
use reglock_kernel_contracts::settings::{
    SETTING_ADMIN_EMAIL, SETTING_DEFAULT_ROLE, SETTING_HOME, SETTING_SITEURL,
    SETTING_USERS_CAN_REGISTER,
};
use reglock_kernel_contracts::snapshot::{DirectoryUser, SnapshotLookup};
use reglock_storage::repo::UserSnapshotRepo;

use crate::host::{HostSettings, InterceptorHost, UserDirectory};
use crate::interceptors::InterceptorSuspension;

/// Per-user comparison of the live directory against the snapshot table.
/// The default reports nothing.
pub trait UserDriftAudit: Send + Sync {
    fn audit_user_drift(&self, _snapshots: &dyn SnapshotLookup, _users: &[DirectoryUser]) -> Vec<Notice> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserDriftAudit;

impl UserDriftAudit for NoUserDriftAudit {}

/// Reads the current site identity, stored and resolved. Unreadable settings
/// count as absent.
pub fn read_site_identity<H: HostSettings + ?Sized>(host: &H) -> SiteIdentity {
    SiteIdentity {
        admin_email: host.read_setting(SETTING_ADMIN_EMAIL).ok().flatten(),
        siteurl: host.read_setting(SETTING_SITEURL).ok().flatten(),
        site_url: host.resolved_site_url(),
        home: host.read_setting(SETTING_HOME).ok().flatten(),
        home_url: host.resolved_home_url(),
    }
}

pub struct DriftAuditWiring {
    runtime: DriftAuditRuntime,
    user_audit: Box<dyn UserDriftAudit>,
}

impl DriftAuditWiring {
    pub fn new(runtime: DriftAuditRuntime) -> Self {
        Self {
            runtime,
            user_audit: Box::new(NoUserDriftAudit),
        }
    }

    pub fn with_user_audit(mut self, user_audit: Box<dyn UserDriftAudit>) -> Self {
        self.user_audit = user_audit;
        self
    }

    pub fn runtime(&self) -> &DriftAuditRuntime {
        &self.runtime
    }

    /// One full audit pass. Never aborts early: a failed read or correction
    /// becomes a notice and the remaining checks still run. Recording the run
    /// time is left to the caller.
    pub fn run_audit<H, S>(&self, host: &mut H, cfg: &LockConfig, snapshots: &S) -> Vec<Notice>
    where
        H: HostSettings + InterceptorHost + UserDirectory + ?Sized,
        S: UserSnapshotRepo,
    {
        let mut notices = Vec::new();
        {
            let mut suspended = InterceptorSuspension::begin(host);
            let registration = suspended.read_setting(SETTING_USERS_CAN_REGISTER).ok().flatten();
            let check = self.runtime.check_registration_flag(registration.as_ref());
            self.apply(&mut *suspended, SETTING_USERS_CAN_REGISTER, check, &mut notices);

            let role = suspended.read_setting(SETTING_DEFAULT_ROLE).ok().flatten();
            let check = self.runtime.check_default_role(role.as_ref());
            self.apply(&mut *suspended, SETTING_DEFAULT_ROLE, check, &mut notices);
        }

        let identity = read_site_identity(&*host);
        for notice in self.runtime.compare_site_identity(&cfg.baseline, &identity) {
            info!(reason_code = notice.reason_code.0, message = %notice.message, "site identity drift");
            notices.push(notice);
        }

        let current = snapshots
            .snapshot_generation_digest(cfg.snapshot_generation)
            .ok();
        if let Some(notice) = self
            .runtime
            .check_snapshot_integrity(cfg.snapshot_digest.as_deref(), current.as_deref())
        {
            warn!(generation = cfg.snapshot_generation, "snapshot digest mismatch");
            notices.push(notice);
        }

        match host.all_users() {
            Ok(users) => {
                notices.extend(self.user_audit.audit_user_drift(snapshots, &users));
            }
            Err(err) => warn!(error = %err, "user directory unavailable; skipping user drift audit"),
        }
        notices
    }

    fn apply<H: HostSettings + ?Sized>(
        &self,
        host: &mut H,
        key: &str,
        check: LockSettingCheck,
        notices: &mut Vec<Notice>,
    ) {
        let Some(notice) = check.notice().cloned() else {
            return;
        };
        match notice.severity {
            NoticeSeverity::Error => warn!(setting = key, "lock setting unreadable; forcing locked value"),
            _ => warn!(setting = key, message = %notice.message, "lock setting drifted; forcing locked value"),
        }
        notices.push(notice);
        let correction: Option<Value> = check.correction().cloned();
        if let Some(value) = correction {
            if let Err(err) = host.write_setting(key, value) {
                warn!(setting = key, error = %err, "lock setting correction failed");
                notices.push(self.runtime.correction_failed(key, &err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reglock_engines::drift::{reason_codes, DriftAuditConfig};
    use reglock_engines::lock_enforcer::{LockEnforcer, LockEnforcerConfig};
    use reglock_kernel_contracts::lockcfg::LockBaseline;
    use reglock_kernel_contracts::version::PluginVersion;
    use reglock_storage::snapshot_store::SnapshotStore;
    use serde_json::json;

    use crate::in_memory_host::InMemoryHost;

    struct CountingAudit;

    impl UserDriftAudit for CountingAudit {
        fn audit_user_drift(&self, _snapshots: &dyn SnapshotLookup, users: &[DirectoryUser]) -> Vec<Notice> {
            vec![Notice::info(
                reglock_kernel_contracts::ReasonCodeId(0x5244_00FF),
                format!("{} users inspected", users.len()),
            )]
        }
    }

    fn wiring() -> DriftAuditWiring {
        let role = LockEnforcerConfig::mvp_v1().locked_role;
        DriftAuditWiring::new(DriftAuditRuntime::new(DriftAuditConfig::mvp_v1(), &role).unwrap())
    }

    fn locked_host() -> InMemoryHost {
        let mut host = InMemoryHost::new_in_memory();
        host.seed_setting(SETTING_USERS_CAN_REGISTER, json!(0));
        host.seed_setting(SETTING_DEFAULT_ROLE, json!("user-registration-lock"));
        let enforcer = LockEnforcer::new(LockEnforcerConfig::mvp_v1()).unwrap();
        host.install_setting_interceptor(Arc::new(enforcer));
        host
    }

    fn cfg() -> LockConfig {
        LockConfig::begin_setup(&PluginVersion::new("1.0.0").unwrap(), LockBaseline::default())
    }

    #[test]
    fn at_drift_audit_01_failed_correction_does_not_stop_remaining_checks() {
        let mut host = locked_host();
        host.seed_setting(SETTING_USERS_CAN_REGISTER, json!(1));
        host.seed_setting(SETTING_DEFAULT_ROLE, json!("author"));
        host.set_failing_write(SETTING_USERS_CAN_REGISTER, true);

        let notices = wiring().run_audit(&mut host, &cfg(), &SnapshotStore::new_in_memory());
        let codes: Vec<_> = notices.iter().map(|n| n.reason_code).collect();
        assert_eq!(
            codes,
            vec![
                reason_codes::DRIFT_REGISTRATION_ENABLED,
                reason_codes::DRIFT_CORRECTION_FAILED,
                reason_codes::DRIFT_DEFAULT_ROLE_CHANGED,
            ]
        );
        assert_eq!(host.stored_setting(SETTING_USERS_CAN_REGISTER), Some(&json!(1)));
        assert_eq!(
            host.stored_setting(SETTING_DEFAULT_ROLE),
            Some(&json!("user-registration-lock"))
        );
        assert!(host.has_setting_interceptor());
    }

    #[test]
    fn at_drift_audit_02_intact_lock_produces_no_notices() {
        let mut host = locked_host();
        let notices = wiring().run_audit(&mut host, &cfg(), &SnapshotStore::new_in_memory());
        assert!(notices.is_empty());
    }

    #[test]
    fn at_drift_audit_03_user_drift_extension_point_is_consulted() {
        let mut host = locked_host();
        let audit = wiring().with_user_audit(Box::new(CountingAudit));
        let notices = audit.run_audit(&mut host, &cfg(), &SnapshotStore::new_in_memory());
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, "0 users inspected");
    }

    #[test]
    fn at_drift_audit_04_resolved_url_filter_is_reported() {
        let mut host = locked_host();
        host.seed_setting("siteurl", json!("https://example.test"));
        let mut cfg = cfg();
        cfg.baseline.siteurl = Some(json!("https://example.test"));
        cfg.baseline.site_url = Some("https://example.test".to_string());
        host.override_resolved_urls(Some("https://cdn.example.test".to_string()), None);

        let notices = wiring().run_audit(&mut host, &cfg, &SnapshotStore::new_in_memory());
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].reason_code, reason_codes::DRIFT_SITE_URL_RESOLVED_CHANGED);
    }

    #[test]
    fn at_drift_audit_05_unavailable_directory_skips_only_user_drift() {
        let mut host = locked_host();
        host.seed_setting(SETTING_USERS_CAN_REGISTER, json!(1));
        host.set_directory_unavailable(true);
        let audit = wiring().with_user_audit(Box::new(CountingAudit));

        let notices = audit.run_audit(&mut host, &cfg(), &SnapshotStore::new_in_memory());
        let codes: Vec<_> = notices.iter().map(|n| n.reason_code).collect();
        assert_eq!(codes, vec![reason_codes::DRIFT_REGISTRATION_ENABLED]);
        assert_eq!(host.stored_setting(SETTING_USERS_CAN_REGISTER), Some(&json!(0)));
    }
}

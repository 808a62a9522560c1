#![forbid(unsafe_code)]

use serde_json::Value;

use reglock_kernel_contracts::lockcfg::{LockBaseline, LockConfig};
use reglock_kernel_contracts::notice::Notice;
use reglock_kernel_contracts::settings::{
    display_value, is_truthy, loosely_equal, SETTING_DEFAULT_ROLE, SETTING_USERS_CAN_REGISTER,
};
use reglock_kernel_contracts::{ContractViolation, UnixTimeSecs, Validate};

use crate::lock_enforcer::LockedRole;

pub mod reason_codes {
    use reglock_kernel_contracts::ReasonCodeId;

    // Drift audit reason-code namespace ("RD").
    pub const DRIFT_REGISTRATION_UNREADABLE: ReasonCodeId = ReasonCodeId(0x5244_0001);
    pub const DRIFT_REGISTRATION_ENABLED: ReasonCodeId = ReasonCodeId(0x5244_0002);
    pub const DRIFT_DEFAULT_ROLE_UNREADABLE: ReasonCodeId = ReasonCodeId(0x5244_0003);
    pub const DRIFT_DEFAULT_ROLE_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0004);
    pub const DRIFT_ADMIN_EMAIL_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0010);
    pub const DRIFT_SITEURL_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0011);
    pub const DRIFT_SITE_URL_RESOLVED_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0012);
    pub const DRIFT_HOME_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0013);
    pub const DRIFT_HOME_URL_RESOLVED_CHANGED: ReasonCodeId = ReasonCodeId(0x5244_0014);
    pub const DRIFT_SNAPSHOT_DIGEST_MISMATCH: ReasonCodeId = ReasonCodeId(0x5244_0020);
    pub const DRIFT_CORRECTION_FAILED: ReasonCodeId = ReasonCodeId(0x5244_0030);
    pub const DRIFT_AUDIT_RUN_UNRECORDED: ReasonCodeId = ReasonCodeId(0x5244_0031);
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftAuditConfig {
    pub audit_interval_secs: u64,
    /// Value written to the registration flag whenever the audit corrects it.
    pub registration_disabled_value: Value,
}

impl DriftAuditConfig {
    pub fn mvp_v1() -> Self {
        Self {
            audit_interval_secs: 3600,
            registration_disabled_value: Value::from(0),
        }
    }
}

impl Validate for DriftAuditConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.audit_interval_secs == 0 || self.audit_interval_secs > 7 * 24 * 3600 {
            return Err(ContractViolation::InvalidRange {
                field: "drift_audit_config.audit_interval_secs",
                min: 1.0,
                max: (7 * 24 * 3600) as f64,
                got: self.audit_interval_secs as f64,
            });
        }
        if is_truthy(&self.registration_disabled_value) {
            return Err(ContractViolation::InvalidValue {
                field: "drift_audit_config.registration_disabled_value",
                reason: "must be falsy",
            });
        }
        Ok(())
    }
}

/// Result of re-reading one lock setting with interceptors suspended.
#[derive(Debug, Clone, PartialEq)]
pub enum LockSettingCheck {
    Intact,
    Unreadable {
        notice: Notice,
        correction: Value,
    },
    Drifted {
        observed: Value,
        notice: Notice,
        correction: Value,
    },
}

impl LockSettingCheck {
    pub fn notice(&self) -> Option<&Notice> {
        match self {
            LockSettingCheck::Intact => None,
            LockSettingCheck::Unreadable { notice, .. }
            | LockSettingCheck::Drifted { notice, .. } => Some(notice),
        }
    }

    /// Value to write back, if any.
    pub fn correction(&self) -> Option<&Value> {
        match self {
            LockSettingCheck::Intact => None,
            LockSettingCheck::Unreadable { correction, .. }
            | LockSettingCheck::Drifted { correction, .. } => Some(correction),
        }
    }
}

/// Current site-identity values, stored and resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteIdentity {
    pub admin_email: Option<Value>,
    pub siteurl: Option<Value>,
    pub site_url: Option<String>,
    pub home: Option<Value>,
    pub home_url: Option<String>,
}

impl SiteIdentity {
    /// The part of a baseline this identity would fill in at setup time.
    pub fn into_baseline(self, users_can_register: Option<Value>, default_role: Option<Value>) -> LockBaseline {
        LockBaseline {
            users_can_register,
            default_role,
            admin_email: self.admin_email,
            siteurl: self.siteurl,
            home: self.home,
            site_url: self.site_url,
            home_url: self.home_url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriftAuditRuntime {
    config: DriftAuditConfig,
    locked_role: String,
}

impl DriftAuditRuntime {
    pub fn new(config: DriftAuditConfig, locked_role: &LockedRole) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            locked_role: locked_role.name().to_string(),
        })
    }

    pub fn config(&self) -> &DriftAuditConfig {
        &self.config
    }

    pub fn is_due(&self, cfg: &LockConfig, now: UnixTimeSecs) -> bool {
        cfg.audit_due(now, self.config.audit_interval_secs)
    }

    pub fn check_registration_flag(&self, stored: Option<&Value>) -> LockSettingCheck {
        let correction = self.config.registration_disabled_value.clone();
        match stored {
            None => LockSettingCheck::Unreadable {
                notice: Notice::error(
                    reason_codes::DRIFT_REGISTRATION_UNREADABLE,
                    format!("The {SETTING_USERS_CAN_REGISTER} setting could not be read; registration has been disabled."),
                ),
                correction,
            },
            Some(v) if loosely_equal(Some(v), Some(&correction)) => LockSettingCheck::Intact,
            Some(v) => LockSettingCheck::Drifted {
                observed: v.clone(),
                notice: Notice::warning(
                    reason_codes::DRIFT_REGISTRATION_ENABLED,
                    format!(
                        "User registration was found enabled through the {SETTING_USERS_CAN_REGISTER} setting (value {}).",
                        quoted(Some(v))
                    ),
                ),
                correction,
            },
        }
    }

    pub fn check_default_role(&self, stored: Option<&Value>) -> LockSettingCheck {
        let correction = Value::String(self.locked_role.clone());
        match stored {
            None => LockSettingCheck::Unreadable {
                notice: Notice::error(
                    reason_codes::DRIFT_DEFAULT_ROLE_UNREADABLE,
                    format!("The {SETTING_DEFAULT_ROLE} setting could not be read; it has been reset to {}.", self.locked_role),
                ),
                correction,
            },
            Some(Value::String(role)) if *role == self.locked_role => LockSettingCheck::Intact,
            Some(v) => LockSettingCheck::Drifted {
                observed: v.clone(),
                notice: Notice::warning(
                    reason_codes::DRIFT_DEFAULT_ROLE_CHANGED,
                    format!(
                        "The default role for new users should be {}, but was found to be {}.",
                        self.locked_role,
                        quoted(Some(v))
                    ),
                ),
                correction,
            },
        }
    }

    /// Notices for site-identity settings that moved away from the baseline.
    /// A resolved URL is only compared when its stored counterpart matched.
    pub fn compare_site_identity(&self, baseline: &LockBaseline, current: &SiteIdentity) -> Vec<Notice> {
        let mut notices = Vec::new();
        if !loosely_equal(baseline.admin_email.as_ref(), current.admin_email.as_ref()) {
            notices.push(changed(
                reason_codes::DRIFT_ADMIN_EMAIL_CHANGED,
                "The administration email address",
                baseline.admin_email.as_ref(),
                current.admin_email.as_ref(),
            ));
        }

        let pairs = [
            (
                (reason_codes::DRIFT_SITEURL_CHANGED, "The stored site address (siteurl)"),
                (&baseline.siteurl, &current.siteurl),
                (reason_codes::DRIFT_SITE_URL_RESOLVED_CHANGED, "The resolved site URL"),
                (&baseline.site_url, &current.site_url),
            ),
            (
                (reason_codes::DRIFT_HOME_CHANGED, "The stored home address (home)"),
                (&baseline.home, &current.home),
                (reason_codes::DRIFT_HOME_URL_RESOLVED_CHANGED, "The resolved home URL"),
                (&baseline.home_url, &current.home_url),
            ),
        ];
        for ((stored_code, stored_label), (saved, now), (resolved_code, resolved_label), (saved_url, now_url)) in pairs {
            if !loosely_equal(saved.as_ref(), now.as_ref()) {
                notices.push(changed(stored_code, stored_label, saved.as_ref(), now.as_ref()));
                continue;
            }
            let saved_url = saved_url.clone().map(Value::String);
            let now_url = now_url.clone().map(Value::String);
            if !loosely_equal(saved_url.as_ref(), now_url.as_ref()) {
                notices.push(changed(resolved_code, resolved_label, saved_url.as_ref(), now_url.as_ref()));
            }
        }
        notices
    }

    /// `current` is `None` when the snapshot table could not be hashed. No
    /// recorded digest means nothing to compare.
    pub fn check_snapshot_integrity(&self, recorded: Option<&str>, current: Option<&str>) -> Option<Notice> {
        let recorded = recorded?;
        if current == Some(recorded) {
            return None;
        }
        Some(Notice::warning(
            reason_codes::DRIFT_SNAPSHOT_DIGEST_MISMATCH,
            "The saved user snapshot no longer matches the digest recorded when the lock engaged.",
        ))
    }

    pub fn correction_failed(&self, setting: &str, detail: &str) -> Notice {
        Notice::error(
            reason_codes::DRIFT_CORRECTION_FAILED,
            format!("The {setting} setting could not be corrected: {detail}."),
        )
    }

    /// The audit ran but its run time was not saved; the next request audits again.
    pub fn audit_run_unrecorded(&self, detail: &str) -> Notice {
        Notice::error(
            reason_codes::DRIFT_AUDIT_RUN_UNRECORDED,
            format!("The drift audit ran but its run time could not be saved: {detail}."),
        )
    }
}

fn changed(
    code: reglock_kernel_contracts::ReasonCodeId,
    label: &str,
    from: Option<&Value>,
    to: Option<&Value>,
) -> Notice {
    Notice::info(
        code,
        format!("{label} has been changed from {} to {}.", quoted(from), quoted(to)),
    )
}

fn quoted(value: Option<&Value>) -> String {
    format!("'{}'", display_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reglock_kernel_contracts::notice::NoticeSeverity;
    use reglock_kernel_contracts::version::PluginVersion;
    use serde_json::json;

    fn runtime() -> DriftAuditRuntime {
        DriftAuditRuntime::new(DriftAuditConfig::mvp_v1(), &crate::lock_enforcer::LockEnforcerConfig::mvp_v1().locked_role)
            .unwrap()
    }

    fn baseline() -> LockBaseline {
        LockBaseline {
            admin_email: Some(json!("admin@example.test")),
            siteurl: Some(json!("https://example.test")),
            home: Some(json!("https://example.test")),
            site_url: Some("https://example.test".to_string()),
            home_url: Some("https://example.test".to_string()),
            ..LockBaseline::default()
        }
    }

    fn identity_matching() -> SiteIdentity {
        SiteIdentity {
            admin_email: Some(json!("admin@example.test")),
            siteurl: Some(json!("https://example.test")),
            site_url: Some("https://example.test".to_string()),
            home: Some(json!("https://example.test")),
            home_url: Some("https://example.test".to_string()),
        }
    }

    #[test]
    fn at_drift_01_registration_flag_states() {
        let rt = runtime();
        assert_eq!(rt.check_registration_flag(Some(&json!(0))), LockSettingCheck::Intact);
        assert_eq!(rt.check_registration_flag(Some(&json!("0"))), LockSettingCheck::Intact);

        let drifted = rt.check_registration_flag(Some(&json!("1")));
        let notice = drifted.notice().unwrap();
        assert_eq!(notice.severity, NoticeSeverity::Warning);
        assert!(notice.message.contains("'1'"));
        assert_eq!(drifted.correction(), Some(&json!(0)));

        let unreadable = rt.check_registration_flag(None);
        assert_eq!(unreadable.notice().unwrap().severity, NoticeSeverity::Error);
        assert_eq!(unreadable.correction(), Some(&json!(0)));
    }

    #[test]
    fn at_drift_02_default_role_names_drifted_value() {
        let rt = runtime();
        assert_eq!(
            rt.check_default_role(Some(&json!("user-registration-lock"))),
            LockSettingCheck::Intact
        );
        let drifted = rt.check_default_role(Some(&json!("administrator")));
        let notice = drifted.notice().unwrap();
        assert_eq!(notice.severity, NoticeSeverity::Warning);
        assert!(notice.message.contains("'administrator'"));
        assert_eq!(drifted.correction(), Some(&json!("user-registration-lock")));
        assert_eq!(
            rt.check_default_role(None).notice().unwrap().severity,
            NoticeSeverity::Error
        );
    }

    #[test]
    fn at_drift_03_resolved_url_skipped_when_stored_url_reported() {
        let rt = runtime();
        let mut now = identity_matching();
        now.siteurl = Some(json!("https://evil.test"));
        now.site_url = Some("https://evil.test".to_string());
        let notices = rt.compare_site_identity(&baseline(), &now);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].reason_code, reason_codes::DRIFT_SITEURL_CHANGED);
        assert_eq!(notices[0].severity, NoticeSeverity::Notice);
    }

    #[test]
    fn at_drift_04_resolved_url_checked_when_stored_matches() {
        let rt = runtime();
        let mut now = identity_matching();
        now.home_url = Some("https://filtered.test".to_string());
        now.admin_email = Some(json!("other@example.test"));
        let notices = rt.compare_site_identity(&baseline(), &now);
        let codes: Vec<_> = notices.iter().map(|n| n.reason_code).collect();
        assert_eq!(
            codes,
            vec![
                reason_codes::DRIFT_ADMIN_EMAIL_CHANGED,
                reason_codes::DRIFT_HOME_URL_RESOLVED_CHANGED
            ]
        );
        assert!(notices[0].to_string().starts_with("Notice: "));
        assert!(rt.compare_site_identity(&baseline(), &identity_matching()).is_empty());
    }

    #[test]
    fn at_drift_05_snapshot_integrity() {
        let rt = runtime();
        let d = "a".repeat(64);
        assert!(rt.check_snapshot_integrity(None, None).is_none());
        assert!(rt.check_snapshot_integrity(Some(&d), Some(&d)).is_none());
        assert!(rt.check_snapshot_integrity(Some(&d), Some(&"b".repeat(64))).is_some());
        assert!(rt.check_snapshot_integrity(Some(&d), None).is_some());
    }

    #[test]
    fn at_drift_06_due_follows_interval() {
        let rt = runtime();
        let mut cfg = LockConfig::begin_setup(&PluginVersion::new("1.0.0").unwrap(), baseline());
        assert!(rt.is_due(&cfg, UnixTimeSecs(5)));
        cfg.last_audit_run = Some(UnixTimeSecs(100));
        assert!(!rt.is_due(&cfg, UnixTimeSecs(3699)));
        assert!(rt.is_due(&cfg, UnixTimeSecs(3700)));
    }

    #[test]
    fn at_drift_07_config_rejects_truthy_sentinel() {
        let cfg = DriftAuditConfig {
            registration_disabled_value: json!(1),
            ..DriftAuditConfig::mvp_v1()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn at_drift_08_unrecorded_run_is_an_error_notice() {
        let notice = runtime().audit_run_unrecorded("store offline");
        assert_eq!(notice.reason_code, reason_codes::DRIFT_AUDIT_RUN_UNRECORDED);
        assert_eq!(notice.severity, NoticeSeverity::Error);
        assert!(notice.message.contains("store offline"));
    }
}

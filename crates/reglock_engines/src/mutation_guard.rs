#![forbid(unsafe_code)]

use serde_json::Value;
use tracing::{info, warn};

use reglock_kernel_contracts::guard::{
    GuardFlag, GuardOutcome, GuardReject, IdentityField, MetaUpdateDecision, PolicyViolation,
    UserMeta, UserMetaInsertRequest, UserMetaUpdateRequest, UserPersistRequest, UserRecordFields,
};
use reglock_kernel_contracts::settings::{as_integer, display_value, is_truthy};
use reglock_kernel_contracts::snapshot::{SnapshotLookup, UserId, UserSnapshot, MAX_PRIVILEGE_LEVEL};
use reglock_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};

pub mod reason_codes {
    use reglock_kernel_contracts::ReasonCodeId;

    // Mutation guard reason-code namespace ("RG").
    pub const GUARD_NEW_ACCOUNT_BLOCKED: ReasonCodeId = ReasonCodeId(0x5247_0001);
    pub const GUARD_NEW_USER_META_BLOCKED: ReasonCodeId = ReasonCodeId(0x5247_0002);
    pub const GUARD_MISSING_SNAPSHOT: ReasonCodeId = ReasonCodeId(0x5247_0003);
    pub const GUARD_SNAPSHOT_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x5247_0004);
    pub const GUARD_IDENTITY_FIELD_CHANGED: ReasonCodeId = ReasonCodeId(0x5247_0005);
    pub const GUARD_ADMINISTRATOR_GRANT: ReasonCodeId = ReasonCodeId(0x5247_0006);
    pub const GUARD_PRIVILEGE_LEVEL_ESCALATION: ReasonCodeId = ReasonCodeId(0x5247_0007);
    pub const GUARD_PRIVILEGE_LEVEL_UNPARSEABLE: ReasonCodeId = ReasonCodeId(0x5247_0008);
    pub const GUARD_FORCE_SSL_DOWNGRADE: ReasonCodeId = ReasonCodeId(0x5247_0009);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationGuardConfig {
    pub capabilities_meta_key: String,
    pub privilege_level_meta_key: String,
    pub force_ssl_meta_key: String,
    pub administrator_role: String,
}

impl MutationGuardConfig {
    /// `meta_prefix` is the host's table prefix used on the two privilege keys
    /// (for example `wp_` gives `wp_capabilities` and `wp_user_level`).
    pub fn mvp_v1(meta_prefix: &str) -> Self {
        Self {
            capabilities_meta_key: format!("{meta_prefix}capabilities"),
            privilege_level_meta_key: format!("{meta_prefix}user_level"),
            force_ssl_meta_key: "use_ssl".to_string(),
            administrator_role: "administrator".to_string(),
        }
    }
}

impl Validate for MutationGuardConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let keys = [
            &self.capabilities_meta_key,
            &self.privilege_level_meta_key,
            &self.force_ssl_meta_key,
        ];
        if keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ContractViolation::InvalidValue {
                field: "mutation_guard_config.meta_keys",
                reason: "must not be empty",
            });
        }
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err(ContractViolation::InvalidValue {
                field: "mutation_guard_config.meta_keys",
                reason: "must be distinct",
            });
        }
        if self.administrator_role.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "mutation_guard_config.administrator_role",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Pre-persist hooks the host invokes synchronously before writing a user
/// record or user metadata.
pub trait UserMutationGuard: Send + Sync {
    fn pre_persist_user(&self, req: &UserPersistRequest) -> GuardOutcome<UserRecordFields>;
    fn pre_insert_user_meta(&self, req: &UserMetaInsertRequest) -> GuardOutcome<UserMeta>;
    fn pre_update_user_meta(&self, req: &UserMetaUpdateRequest) -> MetaUpdateDecision;
}

#[derive(Debug, Clone)]
pub struct MutationGuardRuntime {
    config: MutationGuardConfig,
}

impl MutationGuardRuntime {
    pub fn new(config: MutationGuardConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MutationGuardConfig {
        &self.config
    }

    pub fn guard_new_or_updated_user<L: SnapshotLookup + ?Sized>(
        &self,
        snapshots: &L,
        req: &UserPersistRequest,
    ) -> GuardOutcome<UserRecordFields> {
        let user_id = match (req.is_update, req.user_id) {
            (true, Some(user_id)) => user_id,
            _ => {
                return GuardOutcome::Reject(reject(
                    reason_codes::GUARD_NEW_ACCOUNT_BLOCKED,
                    PolicyViolation::NewAccountBlocked,
                ))
            }
        };
        let snapshot = match require_snapshot(snapshots, user_id) {
            Ok(s) => s,
            Err(r) => return GuardOutcome::Reject(r),
        };

        let proposed = &req.fields;
        let identity = [
            (IdentityField::Login, &proposed.login, &snapshot.login),
            (IdentityField::Email, &proposed.email, &snapshot.email),
            (
                IdentityField::RegisteredAt,
                &proposed.registered_at,
                &snapshot.registered_at,
            ),
        ];
        for (field, proposed, saved) in identity {
            if matches!(proposed, Some(v) if v != saved) {
                return GuardOutcome::Reject(reject(
                    reason_codes::GUARD_IDENTITY_FIELD_CHANGED,
                    PolicyViolation::IdentityFieldChanged { user_id, field },
                ));
            }
        }

        let mut flags = Vec::new();
        if matches!(&proposed.password_hash, Some(p) if *p != snapshot.password_hash) {
            info!(user_id = user_id.0, "password change allowed under registration lock");
            flags.push(GuardFlag::PasswordChanged { user_id });
        }

        GuardOutcome::Proceed {
            data: proposed.clone(),
            flags,
        }
    }

    pub fn guard_user_metadata_insert<L: SnapshotLookup + ?Sized>(
        &self,
        snapshots: &L,
        req: &UserMetaInsertRequest,
    ) -> GuardOutcome<UserMeta> {
        if req.is_update != Some(true) {
            return GuardOutcome::Reject(reject(
                reason_codes::GUARD_NEW_USER_META_BLOCKED,
                PolicyViolation::NewUserMetadataBlocked,
            ));
        }
        let snapshot = match require_snapshot(snapshots, req.user_id) {
            Ok(s) => s,
            Err(r) => return GuardOutcome::Reject(r),
        };

        let mut meta = req.meta.clone();
        let mut flags = Vec::new();
        let key = &self.config.force_ssl_meta_key;
        let keeps_ssl = meta.get(key).map(is_truthy).unwrap_or(false);
        if snapshot.force_ssl_admin() && !keeps_ssl && meta.remove(key).is_some() {
            warn!(
                user_id = req.user_id.0,
                meta_key = key.as_str(),
                "stripped forced-SSL downgrade from metadata batch"
            );
            flags.push(GuardFlag::ForceSslStripped {
                user_id: req.user_id,
            });
        }

        GuardOutcome::Proceed { data: meta, flags }
    }

    pub fn guard_user_metadata_update<L: SnapshotLookup + ?Sized>(
        &self,
        snapshots: &L,
        req: &UserMetaUpdateRequest,
    ) -> MetaUpdateDecision {
        let user_id = req.object_id;
        let snapshot = match require_snapshot(snapshots, user_id) {
            Ok(s) => s,
            Err(r) => return MetaUpdateDecision::Reject(r),
        };
        let mut flags = Vec::new();

        if req.meta_key == self.config.capabilities_meta_key {
            let admin = self.config.administrator_role.as_str();
            if grants_role(&req.meta_value, admin) && !snapshot.raw_capabilities_mention(admin) {
                return MetaUpdateDecision::Reject(reject(
                    reason_codes::GUARD_ADMINISTRATOR_GRANT,
                    PolicyViolation::AdministratorGrant { user_id },
                ));
            }
        } else if req.meta_key == self.config.privilege_level_meta_key {
            let proposed = match &req.meta_value {
                Value::Null => Some(0),
                Value::String(s) if s.trim().is_empty() => Some(0),
                other => as_integer(other),
            };
            let Some(proposed) = proposed else {
                return MetaUpdateDecision::Reject(reject(
                    reason_codes::GUARD_PRIVILEGE_LEVEL_UNPARSEABLE,
                    PolicyViolation::PrivilegeLevelUnparseable { user_id },
                ));
            };
            let proposed_raw = display_value(Some(&req.meta_value));
            if proposed_raw.trim() != snapshot.privilege_level_raw.trim() {
                info!(
                    user_id = user_id.0,
                    from = snapshot.privilege_level_raw.as_str(),
                    to = proposed_raw.as_str(),
                    "privilege level change observed"
                );
                flags.push(GuardFlag::PrivilegeLevelChanged {
                    user_id,
                    from: snapshot.privilege_level_raw.clone(),
                    to: proposed_raw,
                });
            }
            let saved = snapshot.privilege_level();
            // Only the move onto the top tier itself; out-of-range values are flagged above.
            if proposed == i64::from(MAX_PRIVILEGE_LEVEL) && saved < MAX_PRIVILEGE_LEVEL {
                return MetaUpdateDecision::Reject(reject(
                    reason_codes::GUARD_PRIVILEGE_LEVEL_ESCALATION,
                    PolicyViolation::PrivilegeLevelEscalation {
                        user_id,
                        from: saved,
                        to: proposed,
                    },
                ));
            }
        } else if req.meta_key == self.config.force_ssl_meta_key
            && snapshot.force_ssl_admin()
            && !is_truthy(&req.meta_value)
        {
            return MetaUpdateDecision::Reject(reject(
                reason_codes::GUARD_FORCE_SSL_DOWNGRADE,
                PolicyViolation::ForceSslDowngrade { user_id },
            ));
        }

        MetaUpdateDecision::Allow {
            check: req.default_check,
            flags,
        }
    }
}

/// Rejection for a guard whose snapshot source could not be consulted at all.
pub fn snapshot_unavailable(user_id: UserId) -> GuardReject {
    reject(
        reason_codes::GUARD_SNAPSHOT_UNAVAILABLE,
        PolicyViolation::SnapshotUnavailable { user_id },
    )
}

fn require_snapshot<L: SnapshotLookup + ?Sized>(
    snapshots: &L,
    user_id: UserId,
) -> Result<UserSnapshot, GuardReject> {
    snapshots.snapshot_for_user(user_id).ok_or_else(|| {
        reject(
            reason_codes::GUARD_MISSING_SNAPSHOT,
            PolicyViolation::MissingSnapshot { user_id },
        )
    })
}

fn reject(reason_code: ReasonCodeId, violation: PolicyViolation) -> GuardReject {
    warn!(
        reason_code = reason_code.0,
        violation = %violation,
        "user mutation rejected by registration lock"
    );
    GuardReject {
        reason_code,
        violation,
    }
}

/// Whether a proposed capability map hands out `role`. Mappings are checked
/// by key; serialized strings use the same quoted-literal match as the raw
/// snapshot column; lists are checked by element.
fn grants_role(value: &Value, role: &str) -> bool {
    match value {
        Value::Object(map) => map.get(role).map(|v| !v.is_null()).unwrap_or(false),
        Value::String(s) => s.contains(&format!("\"{role}\"")) || s.contains(&format!("'{role}'")),
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some(role)),
        _ => false,
    }
}

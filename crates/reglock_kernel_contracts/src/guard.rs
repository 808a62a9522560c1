#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::UserId;
use crate::{ContractViolation, ReasonCodeId, Validate};

/// Metadata key/value batch as the host is about to persist it.
pub type UserMeta = BTreeMap<String, Value>;

/// Core user-record columns proposed for persistence. Absent fields are not
/// part of the write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserRecordFields {
    pub login: Option<String>,
    pub password_hash: Option<String>,
    pub email: Option<String>,
    pub registered_at: Option<String>,
    /// Display name, nicename, url and anything else the host writes.
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPersistRequest {
    pub fields: UserRecordFields,
    pub is_update: bool,
    pub user_id: Option<UserId>,
    pub raw_input: BTreeMap<String, Value>,
}

impl UserPersistRequest {
    pub fn create_v1(fields: UserRecordFields, raw_input: BTreeMap<String, Value>) -> Self {
        Self {
            fields,
            is_update: false,
            user_id: None,
            raw_input,
        }
    }

    pub fn update_v1(
        user_id: UserId,
        fields: UserRecordFields,
        raw_input: BTreeMap<String, Value>,
    ) -> Result<Self, ContractViolation> {
        user_id.validate()?;
        Ok(Self {
            fields,
            is_update: true,
            user_id: Some(user_id),
            raw_input,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMetaInsertRequest {
    pub meta: UserMeta,
    pub user_id: UserId,
    /// `None` when the host could not say whether the user already exists.
    pub is_update: Option<bool>,
    pub raw_input: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMetaUpdateRequest {
    pub object_id: UserId,
    pub meta_key: String,
    pub meta_value: Value,
    /// Value the host would use if no guard intervened.
    pub default_check: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityField {
    Login,
    Email,
    RegisteredAt,
}

impl IdentityField {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityField::Login => "login",
            IdentityField::Email => "email",
            IdentityField::RegisteredAt => "registered_at",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyViolation {
    NewAccountBlocked,
    NewUserMetadataBlocked,
    MissingSnapshot { user_id: UserId },
    SnapshotUnavailable { user_id: UserId },
    IdentityFieldChanged { user_id: UserId, field: IdentityField },
    AdministratorGrant { user_id: UserId },
    PrivilegeLevelEscalation { user_id: UserId, from: u8, to: i64 },
    PrivilegeLevelUnparseable { user_id: UserId },
    ForceSslDowngrade { user_id: UserId },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::NewAccountBlocked => f.write_str("new accounts cannot be created"),
            PolicyViolation::NewUserMetadataBlocked => {
                f.write_str("metadata for new accounts cannot be created")
            }
            PolicyViolation::MissingSnapshot { user_id } => {
                write!(f, "user {user_id} has no snapshot from lock time")
            }
            PolicyViolation::SnapshotUnavailable { user_id } => {
                write!(f, "snapshot for user {user_id} could not be read")
            }
            PolicyViolation::IdentityFieldChanged { user_id, field } => {
                write!(f, "user {user_id} may not change {}", field.as_str())
            }
            PolicyViolation::AdministratorGrant { user_id } => {
                write!(f, "user {user_id} may not be granted administrator")
            }
            PolicyViolation::PrivilegeLevelEscalation { user_id, from, to } => {
                write!(f, "user {user_id} privilege level may not rise from {from} to {to}")
            }
            PolicyViolation::PrivilegeLevelUnparseable { user_id } => {
                write!(f, "user {user_id} privilege level value is not an integer")
            }
            PolicyViolation::ForceSslDowngrade { user_id } => {
                write!(f, "user {user_id} may not disable forced SSL")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardReject {
    pub reason_code: ReasonCodeId,
    pub violation: PolicyViolation,
}

/// Non-blocking observation worth reporting to an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardFlag {
    PasswordChanged {
        user_id: UserId,
    },
    PrivilegeLevelChanged {
        user_id: UserId,
        from: String,
        to: String,
    },
    ForceSslStripped {
        user_id: UserId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome<T> {
    Proceed { data: T, flags: Vec<GuardFlag> },
    Reject(GuardReject),
}

impl<T> GuardOutcome<T> {
    pub fn is_reject(&self) -> bool {
        matches!(self, GuardOutcome::Reject(_))
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            GuardOutcome::Proceed { data, .. } => Some(data),
            GuardOutcome::Reject(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaUpdateDecision {
    Allow {
        check: Option<bool>,
        flags: Vec<GuardFlag>,
    },
    Reject(GuardReject),
}

impl MetaUpdateDecision {
    pub fn is_reject(&self) -> bool {
        matches!(self, MetaUpdateDecision::Reject(_))
    }

    /// The value handed back to the host's short-circuit slot.
    pub fn host_check(&self) -> Option<bool> {
        match self {
            MetaUpdateDecision::Allow { check, .. } => *check,
            MetaUpdateDecision::Reject(_) => Some(false),
        }
    }
}

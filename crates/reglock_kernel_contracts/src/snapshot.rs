#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::validate_len;
use crate::settings::is_truthy_raw;
use crate::{ContractViolation, Validate};

/// Highest legacy privilege tier.
pub const MAX_PRIVILEGE_LEVEL: u8 = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl Validate for UserId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "user_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live account as enumerated from the host user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub user_id: UserId,
    pub login: String,
    pub password_hash: String,
    pub email: String,
    pub registered_at: String,
    pub roles: Vec<String>,
    pub capabilities: BTreeMap<String, bool>,
    pub effective_capabilities: BTreeMap<String, bool>,
}

/// Identity and privilege fields of one user, captured when the lock engaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub login: String,
    pub password_hash: String,
    pub email: String,
    pub registered_at: String,
    pub roles: Vec<String>,
    pub capabilities: BTreeMap<String, bool>,
    pub effective_capabilities: BTreeMap<String, bool>,
    /// Serialized capability map exactly as the host stored it.
    pub capabilities_raw: String,
    pub privilege_level_raw: String,
    pub force_ssl_raw: String,
}

impl UserSnapshot {
    pub fn capture(
        user: &DirectoryUser,
        capabilities_raw: String,
        privilege_level_raw: String,
        force_ssl_raw: String,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            user_id: user.user_id,
            login: user.login.clone(),
            password_hash: user.password_hash.clone(),
            email: user.email.clone(),
            registered_at: user.registered_at.clone(),
            roles: user.roles.clone(),
            capabilities: user.capabilities.clone(),
            effective_capabilities: user.effective_capabilities.clone(),
            capabilities_raw,
            privilege_level_raw,
            force_ssl_raw,
        };
        s.validate()?;
        Ok(s)
    }

    /// Decoded privilege tier. An empty or unparseable column decodes as 0 so
    /// that any escalation check against it fails closed.
    pub fn privilege_level(&self) -> u8 {
        self.privilege_level_raw
            .trim()
            .parse::<u8>()
            .map(|v| v.min(MAX_PRIVILEGE_LEVEL))
            .unwrap_or(0)
    }

    pub fn force_ssl_admin(&self) -> bool {
        is_truthy_raw(self.force_ssl_raw.trim())
    }

    /// Literal match of `"<role>"` or `'<role>'` inside the raw capability
    /// column. The stored form is never deserialized; a quoted role name in an
    /// unrelated position would also match.
    pub fn raw_capabilities_mention(&self, role: &str) -> bool {
        let double = format!("\"{role}\"");
        let single = format!("'{role}'");
        self.capabilities_raw.contains(&double) || self.capabilities_raw.contains(&single)
    }
}

impl Validate for UserSnapshot {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.user_id.validate()?;
        if self.login.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "user_snapshot.login",
                reason: "must not be empty",
            });
        }
        validate_len("user_snapshot.login", &self.login, 60)?;
        validate_len("user_snapshot.password_hash", &self.password_hash, 255)?;
        validate_len("user_snapshot.email", &self.email, 100)?;
        validate_len("user_snapshot.registered_at", &self.registered_at, 32)?;
        Ok(())
    }
}

/// Read-only access to the snapshot table, as needed by the mutation guards.
pub trait SnapshotLookup {
    fn snapshot_for_user(&self, user_id: UserId) -> Option<UserSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_user() -> DirectoryUser {
        DirectoryUser {
            user_id: UserId(7),
            login: "editor".to_string(),
            password_hash: "$P$hash".to_string(),
            email: "editor@example.test".to_string(),
            registered_at: "2021-04-01 10:00:00".to_string(),
            roles: vec!["editor".to_string()],
            capabilities: BTreeMap::from([("editor".to_string(), true)]),
            effective_capabilities: BTreeMap::from([("edit_posts".to_string(), true)]),
        }
    }

    #[test]
    fn at_snapshot_01_privilege_level_fails_closed_to_zero() {
        let mut s = UserSnapshot::capture(&directory_user(), String::new(), "7".into(), "".into())
            .unwrap();
        assert_eq!(s.privilege_level(), 7);
        s.privilege_level_raw = "not-a-number".to_string();
        assert_eq!(s.privilege_level(), 0);
        s.privilege_level_raw = String::new();
        assert_eq!(s.privilege_level(), 0);
    }

    #[test]
    fn at_snapshot_02_admin_marker_matches_either_quote_style() {
        let mut s = UserSnapshot::capture(&directory_user(), String::new(), "0".into(), "".into())
            .unwrap();
        s.capabilities_raw = "a:1:{s:13:\"administrator\";b:1;}".to_string();
        assert!(s.raw_capabilities_mention("administrator"));
        s.capabilities_raw = "{'administrator': true}".to_string();
        assert!(s.raw_capabilities_mention("administrator"));
        s.capabilities_raw = "a:1:{s:6:\"editor\";b:1;}".to_string();
        assert!(!s.raw_capabilities_mention("administrator"));
    }

    #[test]
    fn at_snapshot_03_capture_requires_login_and_id() {
        let mut u = directory_user();
        u.login = " ".to_string();
        assert!(UserSnapshot::capture(&u, String::new(), String::new(), String::new()).is_err());
        let mut u = directory_user();
        u.user_id = UserId(0);
        assert!(UserSnapshot::capture(&u, String::new(), String::new(), String::new()).is_err());
    }

    #[test]
    fn at_snapshot_04_force_ssl_decodes_raw_truthiness() {
        let s = UserSnapshot::capture(&directory_user(), String::new(), "0".into(), "1".into())
            .unwrap();
        assert!(s.force_ssl_admin());
        let s = UserSnapshot::capture(&directory_user(), String::new(), "0".into(), "0".into())
            .unwrap();
        assert!(!s.force_ssl_admin());
    }
}

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::{ContractViolation, Validate};

/// Dotted release version of the installed code or data shape ("1.0.0").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginVersion(String);

impl PluginVersion {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `stored` predates this version. An absent or unparseable
    /// stored marker is always older.
    pub fn supersedes(&self, stored: Option<&str>) -> bool {
        match stored {
            None => true,
            Some(stored) => compare_versions(stored, &self.0) == Ordering::Less,
        }
    }
}

impl Validate for PluginVersion {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("plugin_version", &self.0, 32)?;
        if parse_release(&self.0).is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "plugin_version",
                reason: "must start with a dotted numeric release",
            });
        }
        Ok(())
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Orders two dotted versions numerically, padding the shorter release with
/// zeros. A pre-release suffix (`1.2.0-beta`) sorts below its bare release.
/// Unparseable input sorts below everything parseable.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    match (parse_release(left), parse_release(right)) {
        (Some((a, a_pre)), Some((b, b_pre))) => {
            let len = a.len().max(b.len());
            for i in 0..len {
                let x = a.get(i).copied().unwrap_or(0);
                let y = b.get(i).copied().unwrap_or(0);
                match x.cmp(&y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            match (a_pre, b_pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(y),
            }
        }
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => left.cmp(right),
    }
}

fn parse_release(version: &str) -> Option<(Vec<u64>, Option<&str>)> {
    let clean = version.trim();
    let clean = clean.strip_prefix('v').unwrap_or(clean);
    let (release, pre) = match clean.find(['-', '+']) {
        Some(idx) => (&clean[..idx], Some(&clean[idx + 1..])),
        None => (clean, None),
    };
    let mut parts = Vec::new();
    for part in release.split('.') {
        parts.push(part.parse::<u64>().ok()?);
    }
    if parts.is_empty() {
        return None;
    }
    Some((parts, pre))
}

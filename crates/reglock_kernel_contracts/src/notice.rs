#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ReasonCodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NoticeSeverity {
    Error,
    Warning,
    Notice,
}

impl NoticeSeverity {
    pub fn prefix(self) -> &'static str {
        match self {
            NoticeSeverity::Error => "Error",
            NoticeSeverity::Warning => "Warning",
            NoticeSeverity::Notice => "Notice",
        }
    }
}

/// Human-readable audit finding. The caller decides how to surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl Notice {
    pub fn error(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Error,
            reason_code,
            message: message.into(),
        }
    }

    pub fn warning(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Warning,
            reason_code,
            message: message.into(),
        }
    }

    pub fn info(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Notice,
            reason_code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity.prefix(), self.message)
    }
}

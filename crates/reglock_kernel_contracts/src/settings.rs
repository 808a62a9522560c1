#![forbid(unsafe_code)]

use serde_json::Value;

/// Host setting: whether visitors may self-register.
pub const SETTING_USERS_CAN_REGISTER: &str = "users_can_register";
/// Host setting: role assigned to newly created accounts.
pub const SETTING_DEFAULT_ROLE: &str = "default_role";
pub const SETTING_ADMIN_EMAIL: &str = "admin_email";
/// Stored site address (the resolved form may be filtered by the host).
pub const SETTING_SITEURL: &str = "siteurl";
/// Stored home address (the resolved form may be filtered by the host).
pub const SETTING_HOME: &str = "home";

/// The two settings the lock forces on every read.
pub const LOCK_SETTINGS: [&str; 2] = [SETTING_USERS_CAN_REGISTER, SETTING_DEFAULT_ROLE];

/// Host truthiness for loosely typed stored values: null, false, 0, "", "0"
/// and empty collections are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Same rule applied to a verbatim metadata column.
pub fn is_truthy_raw(raw: &str) -> bool {
    !(raw.is_empty() || raw == "0")
}

/// Reads a stored value as an integer, accepting numeric strings.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Renders a stored value the way it would appear in an admin notice.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "1".to_string(),
        Some(Value::Bool(false)) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Loose equality used for drift checks: two values match when they render
/// identically.
pub fn loosely_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    display_value(a) == display_value(b)
}

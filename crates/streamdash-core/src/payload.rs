//! Helpers for loosely-typed backend payloads.
//!
//! Plex-style JSON (and anything converted from XML) renders a one-element
//! collection as a bare object and numbers as either numbers or strings.
//! Every reader in this workspace goes through [`as_list`] and
//! [`NumericField`] instead of matching on `serde_json::Value` by hand.

use serde_json::Value;

/// Normalize a field that may be absent, null, a single item, or an array
/// into a list of items.
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// A numeric payload field that may be missing or not a number at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericField {
    Missing,
    Malformed,
    Present(f64),
}

impl NumericField {
    /// Read a field that may be a JSON number or a numeric string.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Number(n)) => n.as_f64().map_or(Self::Malformed, Self::Present),
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Self::Missing;
                }
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Self::Present(v),
                    _ => Self::Malformed,
                }
            },
            Some(_) => Self::Malformed,
        }
    }

    /// Shorthand for `NumericField::from_value(obj.get(key))`.
    pub fn field(obj: &Value, key: &str) -> Self {
        Self::from_value(obj.get(key))
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Present(v) => Some(v),
            Self::Missing | Self::Malformed => None,
        }
    }

    pub fn or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    /// Non-negative integer view; fractional parts are truncated.
    pub fn as_u64(self) -> Option<u64> {
        self.value().filter(|v| *v >= 0.0).map(|v| v as u64)
    }
}

/// Loose truthiness used for flags such as a player's `local` marker.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes")
        },
        _ => false,
    }
}

/// Read a string field, treating empty strings as absent. Numbers are
/// rendered as strings so ids survive either encoding.
pub fn str_field<'a>(obj: &'a Value, key: &str) -> Option<std::borrow::Cow<'a, str>> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(std::borrow::Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(std::borrow::Cow::Owned(n.to_string())),
        _ => None,
    }
}

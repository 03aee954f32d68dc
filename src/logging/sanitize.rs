//! Sensitive-field redaction
//!
//! Applied once when an entry is created. Keys are matched
//! case-insensitively at any depth of the structured data.

use crate::constants::{DEFAULT_SENSITIVE_FIELDS, REDACTED};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Sanitizer {
    keys: HashSet<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS.iter().copied())
    }
}

impl Sanitizer {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Return a copy of `value` with every sensitive key's value replaced.
    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.keys.contains(&k.to_ascii_lowercase()) {
                            Value::String(REDACTED.to_string())
                        } else {
                            self.sanitize(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.sanitize(v)).collect()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_keys() {
        let s = Sanitizer::default();
        let out = s.sanitize(&json!({
            "user": "ada",
            "Password": "hunter2",
            "nested": {"api_key": "k", "ok": 1},
            "list": [{"token": "t"}]
        }));

        assert_eq!(out["user"], "ada");
        assert_eq!(out["Password"], REDACTED);
        assert_eq!(out["nested"]["api_key"], REDACTED);
        assert_eq!(out["nested"]["ok"], 1);
        assert_eq!(out["list"][0]["token"], REDACTED);
    }

    #[test]
    fn test_scalars_untouched() {
        let s = Sanitizer::new(["secret"]);
        assert_eq!(s.sanitize(&json!("secret")), json!("secret"));
        assert_eq!(s.sanitize(&json!(42)), json!(42));
    }
}

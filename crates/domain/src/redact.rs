//! Centralized redaction of sensitive fields before logging.
//!
//! Applied by the audit log and by adapter-boundary error logging so raw
//! tokens, keys, phone numbers, and verification codes never reach the logs.

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Key substrings whose values are always redacted (case-insensitive).
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "api_key",
    "apikey",
    "secret",
    "password",
    "credential",
    "phone",
    "verification_code",
];

/// Return `true` when a key names a sensitive field.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

/// Redact a single value if its key is sensitive.
pub fn redact_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        Value::String(REDACTED.into())
    } else {
        value.clone()
    }
}

/// Recursively redact sensitive fields in a JSON value.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED.into()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys() {
        let input = json!({
            "user_id": "42",
            "api_key": "sk-12345",
            "nested": { "bot_token": "abc", "text": "hello" },
            "items": [{ "password": "pw" }],
        });
        let out = redact(&input);
        assert_eq!(out["user_id"], "42");
        assert_eq!(out["api_key"], "[REDACTED]");
        assert_eq!(out["nested"]["bot_token"], "[REDACTED]");
        assert_eq!(out["nested"]["text"], "hello");
        assert_eq!(out["items"][0]["password"], "[REDACTED]");
    }

    #[test]
    fn key_matching_is_case_insensitive() {
        assert!(is_sensitive_key("TELEGRAM_BOT_TOKEN"));
        assert!(is_sensitive_key("ApiKey"));
        assert!(!is_sensitive_key("chat_id"));
    }
}

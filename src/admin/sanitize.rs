//! Config dump sanitization
//!
//! Envoy's `/config_dump` can contain key material and credentials. The dump
//! is redacted before it is handed to an operator.

use serde_json::Value;

pub const REDACTED: &str = "[redacted]";

/// Keys whose value is always replaced, wherever they appear.
const SENSITIVE_KEYS: &[&str] = &["private_key", "password", "session_ticket_keys"];

/// Redact sensitive values in a parsed config dump in place.
///
/// Returns how many values were replaced.
pub fn sanitize_config_dump(dump: &mut Value) -> usize {
    match dump {
        Value::Object(map) => {
            let mut redacted = 0;
            for (key, value) in map.iter_mut() {
                if SENSITIVE_KEYS.contains(&key.as_str()) {
                    if !is_redacted(value) {
                        *value = Value::String(REDACTED.to_string());
                        redacted += 1;
                    }
                    continue;
                }
                match key.as_str() {
                    "generic_secret" => redacted += redact_field(value, "secret"),
                    "initial_metadata" => redacted += redact_authorization_metadata(value),
                    _ => {}
                }
                redacted += sanitize_config_dump(value);
            }
            redacted
        }
        Value::Array(items) => items.iter_mut().map(sanitize_config_dump).sum(),
        _ => 0,
    }
}

fn is_redacted(value: &Value) -> bool {
    value.as_str() == Some(REDACTED)
}

fn redact_field(value: &mut Value, field: &str) -> usize {
    match value.get_mut(field) {
        Some(inner) if !is_redacted(inner) => {
            *inner = Value::String(REDACTED.to_string());
            1
        }
        _ => 0,
    }
}

fn redact_authorization_metadata(value: &mut Value) -> usize {
    let Some(entries) = value.as_array_mut() else {
        return 0;
    };
    entries
        .iter_mut()
        .filter(|entry| {
            entry
                .get("key")
                .and_then(Value::as_str)
                .is_some_and(|key| key.eq_ignore_ascii_case("authorization"))
        })
        .map(|entry| redact_field(entry, "value"))
        .sum()
}

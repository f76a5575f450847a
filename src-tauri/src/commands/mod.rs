//! Tauri IPC command handlers.
//!
//! Commands are thin: they resolve the signed-in user, normalize the
//! payload and call into the domain modules.

pub mod accounts;
pub mod auth;
pub mod diagnostics;
pub mod expenses;
pub mod ledger;
pub mod mpesa;
pub mod overview;
pub mod payments;
pub mod reconciliation;
pub mod settings;
pub mod staff;

use serde_json::Value;

/// The payload object, or an empty object when the frontend sent nothing.
pub(crate) fn payload_object(arg0: Option<Value>) -> Value {
    match arg0 {
        Some(v @ Value::Object(_)) => v,
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// A single string argument passed either bare or under one of `keys`.
pub(crate) fn payload_arg0_as_string(arg0: Option<Value>, keys: &[&str]) -> Option<String> {
    let value = arg0?;
    let raw = match &value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => keys
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str)),
        _ => None,
    }?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Fill `key` with `value` unless the payload already carries a non-empty
/// string there.
pub(crate) fn with_default(mut payload: Value, key: &str, value: &str) -> Value {
    let present = payload
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !present {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_arg_bare_or_keyed() {
        assert_eq!(
            payload_arg0_as_string(Some(json!(" 2024-03-12 ")), &["date"]).as_deref(),
            Some("2024-03-12")
        );
        assert_eq!(
            payload_arg0_as_string(Some(json!({ "date": "2024-03-12" })), &["date"]).as_deref(),
            Some("2024-03-12")
        );
        assert_eq!(payload_arg0_as_string(Some(json!("  ")), &["date"]), None);
        assert_eq!(payload_arg0_as_string(None, &["date"]), None);
    }

    #[test]
    fn with_default_keeps_existing_values() {
        let filled = with_default(json!({}), "attendantName", "Wanjiru");
        assert_eq!(filled["attendantName"], "Wanjiru");
        let kept = with_default(json!({ "attendantName": "Kamau" }), "attendantName", "Wanjiru");
        assert_eq!(kept["attendantName"], "Kamau");
        assert_eq!(payload_object(Some(json!("x"))), json!({}));
    }
}

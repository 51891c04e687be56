//! Helpers for reading loosely typed record fields
//!
//! Snapshot records are flat JSON objects mirrored from database rows,
//! so a "missing" field may be absent, null, or an empty string, and
//! flag columns arrive as bool, 0/1 or text depending on the driver.

use serde_json::Value;

/// A field counts as present when it exists and is neither null nor an
/// empty string. NULL columns and empty text both mean "not set".
pub fn field<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    match record.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(value) => Some(value),
    }
}

/// Field rendered as a plain string, for natural-key comparison and for
/// labeling findings (numeric ids stay readable).
pub fn field_text(record: &Value, key: &str) -> Option<String> {
    field(record, key).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Truthiness for flag columns.
pub fn flag(record: &Value, key: &str) -> bool {
    match record.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_and_null_fields_are_absent() {
        let record = json!({"a": "", "b": null, "c": "x", "d": 0});
        assert!(field(&record, "a").is_none());
        assert!(field(&record, "b").is_none());
        assert!(field(&record, "missing").is_none());
        assert!(field(&record, "c").is_some());
        assert!(field(&record, "d").is_some());
    }

    #[test]
    fn flags_accept_driver_representations() {
        let record = json!({"a": true, "b": 1, "c": "1", "d": 0, "e": "false", "f": false});
        assert!(flag(&record, "a"));
        assert!(flag(&record, "b"));
        assert!(flag(&record, "c"));
        assert!(!flag(&record, "d"));
        assert!(!flag(&record, "e"));
        assert!(!flag(&record, "f"));
        assert!(!flag(&record, "missing"));
    }

    #[test]
    fn field_text_renders_numbers() {
        let record = json!({"id": 7, "name": "svc"});
        assert_eq!(field_text(&record, "id").unwrap(), "7");
        assert_eq!(field_text(&record, "name").unwrap(), "svc");
    }
}

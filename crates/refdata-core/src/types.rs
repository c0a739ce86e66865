use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One result row: field name to value, in the column order the engine returned
pub type Record = serde_json::Map<String, Value>;

/// Opaque token identifying the state of the source dataset.
///
/// Only equality is meaningful. A marker that moves "backward" is just as
/// different as one that moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionMarker(Value);

impl VersionMarker {
    /// Wrap an observed value. `null` is not a version and yields `None`.
    pub fn new(value: Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Read the marker out of `field` in a probe record
    pub fn from_record(record: &Record, field: &str) -> Option<Self> {
        record.get(field).cloned().and_then(Self::new)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for VersionMarker {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

impl From<i64> for VersionMarker {
    fn from(n: i64) -> Self {
        Self(Value::from(n))
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_marker_from_record() {
        let rec = record(json!({"max_month": "2025-01-01"}));
        let marker = VersionMarker::from_record(&rec, "max_month").unwrap();
        assert_eq!(marker, VersionMarker::from("2025-01-01"));
        assert_eq!(marker.to_string(), "2025-01-01");
    }

    #[test]
    fn test_null_is_not_a_marker() {
        let rec = record(json!({"max_month": null}));
        assert!(VersionMarker::from_record(&rec, "max_month").is_none());
        assert!(VersionMarker::from_record(&rec, "other").is_none());
    }

    #[test]
    fn test_marker_equality_is_type_sensitive() {
        assert_ne!(VersionMarker::from(202501), VersionMarker::from("202501"));
        assert_eq!(VersionMarker::from(202501).to_string(), "202501");
    }

    #[test]
    fn test_record_keeps_column_order() {
        let rec = record(json!({"id": 1, "bnf_code": "0101010G0AAABAB", "vmp": 318136009}));
        let keys: Vec<&str> = rec.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["id", "bnf_code", "vmp"]);
    }
}

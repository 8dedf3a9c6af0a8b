use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A log record submitted for processing.
///
/// Opaque to the queue core — the coordinator stores it verbatim and hands it
/// back on assignment. Only diagnostic logging ever looks inside.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    /// Severity label (e.g. "info", "error"). Not interpreted.
    pub level: String,
    /// Originating system or component label.
    pub source: String,
    /// Producer-side timestamp. Defaults to coordinator receive time when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form metadata, stored verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl LogRecord {
    pub fn new(message: impl Into<String>, level: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: level.into(),
            source: source.into(),
            timestamp: None,
            metadata: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_record_deserializes() {
        let record: LogRecord =
            serde_json::from_str(r#"{"message": "disk full", "level": "error", "source": "api"}"#)
                .unwrap();
        assert_eq!(record.message, "disk full");
        assert!(record.timestamp.is_none());
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_metadata_preserved_verbatim() {
        let json = r#"{
            "message": "m", "level": "info", "source": "s",
            "metadata": {"host": "web-1", "attempt": 3, "ratio": 0.5, "flag": true, "nil": null}
        }"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["metadata"]["host"], "web-1");
        assert_eq!(out["metadata"]["attempt"], 3);
        assert_eq!(out["metadata"]["flag"], true);
        assert!(out["metadata"]["nil"].is_null());
    }
}

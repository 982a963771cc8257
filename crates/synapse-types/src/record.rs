//! Append-only execution history entries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Started,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RecordStatus::Started)
    }
}

/// One stage transition. Records are never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub stage_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn started(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            timestamp: chrono::Utc::now(),
            status: RecordStatus::Started,
            duration_ms: None,
            error: None,
        }
    }

    pub fn completed(stage_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage_id: stage_id.into(),
            timestamp: chrono::Utc::now(),
            status: RecordStatus::Completed,
            duration_ms: Some(duration_ms),
            error: None,
        }
    }

    pub fn failed(stage_id: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            timestamp: chrono::Utc::now(),
            status: RecordStatus::Failed,
            duration_ms: Some(duration_ms),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_status() {
        assert_eq!(ExecutionRecord::started("a").status, RecordStatus::Started);
        let done = ExecutionRecord::completed("a", 12);
        assert_eq!(done.status, RecordStatus::Completed);
        assert_eq!(done.duration_ms, Some(12));
        let failed = ExecutionRecord::failed("a", 3, "boom");
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.status.is_terminal());
        assert!(!RecordStatus::Started.is_terminal());
    }

    #[test]
    fn record_serializes_camel_case() {
        let rec = ExecutionRecord::failed("parse", 40, "bad input");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["stageId"], "parse");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["durationMs"], 40);
        assert!(json["timestamp"].is_string());

        let started = serde_json::to_value(ExecutionRecord::started("parse")).unwrap();
        assert!(started.get("durationMs").is_none());
        assert!(started.get("error").is_none());
    }
}

//! Shared types and errors for the Synapse pipeline core.
//!
//! This crate provides the foundational types used across all other Synapse crates:
//! - `SynapseError` - unified error taxonomy
//! - `Stage` / `StageKind` / `StageStatus` - the unit of pipeline work
//! - `ExecutionRecord` - append-only audit entry for stage transitions

pub mod record;
pub mod stage;

pub use record::{ExecutionRecord, RecordStatus};
pub use stage::{Stage, StageKind, StageStatus};

/// Unified error type for all Synapse subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SynapseError {
    // === Plan Errors ===
    #[error("Plan contains a dependency cycle through stages: {}", .stages.join(" -> "))]
    CyclicGraph { stages: Vec<String> },

    #[error("Failed to parse plan: {0}")]
    PlanParse(String),

    #[error("Plan validation failed: {0}")]
    Validation(String),

    #[error("Stage '{0}' not found")]
    StageNotFound(String),

    // === Execution Errors ===
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    // === Panel Errors ===
    #[error("Unknown panel type '{0}'")]
    UnknownPanelType(String),

    #[error("Panel '{0}' not found")]
    PanelNotFound(String),

    // === Protocol Errors ===
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("Message queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SynapseError {
    /// Returns `true` if the failure is expected to clear on its own
    /// (a later command or message may succeed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SynapseError::CommandTimeout { .. }
                | SynapseError::Transport(_)
                | SynapseError::QueueFull { .. }
        )
    }

    /// Returns `false` for errors that are only ever logged. Malformed and
    /// unknown messages are normal under version skew between agent and core.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            SynapseError::MalformedMessage(_)
                | SynapseError::UnknownMessageType(_)
                | SynapseError::QueueFull { .. }
        )
    }
}

/// A convenience alias for `Result<T, SynapseError>`.
pub type Result<T> = std::result::Result<T, SynapseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_cyclic_graph() {
        let err = SynapseError::CyclicGraph {
            stages: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Plan contains a dependency cycle through stages: a -> b -> a"
        );
    }

    #[test]
    fn error_display_plan_parse() {
        let err = SynapseError::PlanParse("expected value at line 1".into());
        assert_eq!(err.to_string(), "Failed to parse plan: expected value at line 1");
    }

    #[test]
    fn error_display_stage_execution() {
        let err = SynapseError::StageExecution {
            stage: "parse".into(),
            message: "engine unavailable".into(),
        };
        assert_eq!(err.to_string(), "Stage 'parse' failed: engine unavailable");
    }

    #[test]
    fn error_display_unknown_panel_type() {
        let err = SynapseError::UnknownPanelType("hologram".into());
        assert_eq!(err.to_string(), "Unknown panel type 'hologram'");
    }

    #[test]
    fn error_display_command_timeout() {
        let err = SynapseError::CommandTimeout {
            command: "generateAST".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "Command 'generateAST' timed out after 5000ms");
    }

    #[test]
    fn error_display_queue_full() {
        let err = SynapseError::QueueFull { capacity: 8 };
        assert_eq!(err.to_string(), "Message queue is full (8 messages)");
    }

    // --- classification ---

    #[test]
    fn transient_errors() {
        assert!(SynapseError::Transport("closed".into()).is_transient());
        assert!(SynapseError::CommandTimeout {
            command: "x".into(),
            timeout_ms: 1
        }
        .is_transient());
        assert!(!SynapseError::PlanParse("bad".into()).is_transient());
    }

    #[test]
    fn dropped_messages_are_not_user_visible() {
        assert!(!SynapseError::MalformedMessage("missing payload".into()).is_user_visible());
        assert!(!SynapseError::UnknownMessageType("telemetry".into()).is_user_visible());
        assert!(SynapseError::StageExecution {
            stage: "s".into(),
            message: "boom".into()
        }
        .is_user_visible());
        assert!(SynapseError::CyclicGraph { stages: vec![] }.is_user_visible());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "plan.json");
        let err: SynapseError = io_err.into();
        assert!(matches!(err, SynapseError::Io(_)));
        assert!(err.to_string().contains("plan.json"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SynapseError = json_err.into();
        assert!(matches!(err, SynapseError::Json(_)));
    }

    #[test]
    fn result_alias_err() {
        fn example() -> Result<()> {
            Err(SynapseError::Other("fail".into()))
        }
        assert!(example().is_err());
    }
}

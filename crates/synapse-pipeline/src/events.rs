//! Orchestration events for observers.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! renderers, loggers and the CLI can follow plan loads, stage progress and
//! panel changes without reaching into the store.

use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Events emitted by the orchestrator, executor and panel manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    PlanLoaded {
        stage_count: usize,
        panel_count: usize,
    },
    PlanRejected {
        error: String,
    },
    PipelineStarted {
        stage_count: usize,
    },
    PipelineCompleted {
        completed: Vec<String>,
        failed: Vec<String>,
        duration_ms: u64,
    },
    PipelineAborted {
        stage_id: String,
        error: String,
    },
    PipelineReset,
    StageStarted {
        stage_id: String,
        engine: String,
    },
    StageCompleted {
        stage_id: String,
        duration_ms: u64,
    },
    StageFailed {
        stage_id: String,
        error: String,
        duration_ms: u64,
    },
    StageBlocked {
        stage_id: String,
        waiting_on: Vec<String>,
    },
    PanelOpened {
        panel_id: String,
        panel_type: String,
        stage_id: Option<String>,
    },
    PanelClosed {
        panel_id: String,
    },
    PanelResized {
        panel_id: String,
        width: f64,
        height: f64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream. Events missed by a lagging subscriber are
    /// skipped.
    pub fn stream(&self) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|e| e.ok())
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::PipelineStarted { stage_count: 3 });

        match rx.recv().await.unwrap() {
            PipelineEvent::PipelineStarted { stage_count } => assert_eq!(stage_count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_yields_in_emit_order() {
        let emitter = EventEmitter::new(16);
        let stream = emitter.stream();
        tokio::pin!(stream);

        emitter.emit(PipelineEvent::StageStarted {
            stage_id: "a".into(),
            engine: "tool:x".into(),
        });
        emitter.emit(PipelineEvent::StageCompleted {
            stage_id: "a".into(),
            duration_ms: 5,
        });

        assert!(matches!(
            stream.next().await,
            Some(PipelineEvent::StageStarted { .. })
        ));
        assert!(matches!(
            stream.next().await,
            Some(PipelineEvent::StageCompleted { duration_ms: 5, .. })
        ));
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::PlanRejected {
            error: "cycle".into(),
        });
        assert_eq!(emitter.receiver_count(), 0);
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = PipelineEvent::StageBlocked {
            stage_id: "render".into(),
            waiting_on: vec!["parse".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}

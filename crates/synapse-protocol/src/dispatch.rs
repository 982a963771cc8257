//! Message handler trait, handler registry, and the queue-draining dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use synapse_types::{Result, SynapseError};

use crate::message::{Message, MessageType};
use crate::queue::{MessageQueue, QueueConfig};

// ---------------------------------------------------------------------------
// MessageHandler trait
// ---------------------------------------------------------------------------

/// Reacts to one message type. All business logic for inbound messages lives
/// in handlers; the dispatcher only routes.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn message_type(&self) -> MessageType;

    async fn handle(&self, message: &Message) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the same type.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(handler.message_type(), handler);
    }

    pub fn get(&self, message_type: &MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn has(&self, message_type: &MessageType) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn registered_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }
}

// ---------------------------------------------------------------------------
// MessageDispatcher
// ---------------------------------------------------------------------------

/// Counts from one call to [`MessageDispatcher::process_queue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub handled: usize,
    /// Known type, no handler registered.
    pub unhandled: usize,
    /// Type outside the protocol vocabulary.
    pub unknown: usize,
    /// Handler returned an error.
    pub failed: usize,
    /// Another drain was already running; this call did nothing.
    pub skipped: bool,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.handled + self.unhandled + self.unknown + self.failed
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MessageDispatcher {
    queue: MessageQueue,
    handlers: RwLock<HandlerRegistry>,
    draining: AtomicBool,
}

impl MessageDispatcher {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_registry(config, HandlerRegistry::new())
    }

    pub fn with_registry(config: QueueConfig, registry: HandlerRegistry) -> Self {
        Self {
            queue: MessageQueue::new(config),
            handlers: RwLock::new(registry),
            draining: AtomicBool::new(false),
        }
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        match self.handlers.write() {
            Ok(mut registry) => registry.register(handler),
            Err(_) => tracing::error!("handler registry lock poisoned; handler not registered"),
        }
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Validate and queue a raw inbound message. Rejected messages are logged
    /// and the error is returned; the queue is left unchanged.
    pub fn enqueue(&self, raw: Value) -> Result<()> {
        self.queue.push_raw(raw).inspect_err(log_rejected)
    }

    /// Queue a message received as JSON text.
    pub fn enqueue_text(&self, text: &str) -> Result<()> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| SynapseError::MalformedMessage(format!("invalid JSON: {e}")))
            .inspect_err(log_rejected)?;
        self.enqueue(raw)
    }

    pub fn enqueue_message(&self, message: Message) -> Result<()> {
        self.queue.push(message).inspect_err(log_rejected)
    }

    /// Drain the queue in arrival order, one handler at a time.
    ///
    /// Messages enqueued while the drain is running are handled by the same
    /// drain. A call made while another drain is active returns immediately
    /// with `skipped` set.
    pub async fn process_queue(&self) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                report.skipped = report.total() == 0;
                return report;
            }
            let guard = DrainGuard(&self.draining);

            while let Some(message) = self.queue.pop() {
                self.dispatch(&message, &mut report).await;
            }

            drop(guard);
            // A message can land between the last pop and the flag reset.
            if self.queue.is_empty() {
                break;
            }
        }

        tracing::debug!(
            handled = report.handled,
            unhandled = report.unhandled,
            unknown = report.unknown,
            failed = report.failed,
            "message queue drained"
        );
        report
    }

    async fn dispatch(&self, message: &Message, report: &mut DrainReport) {
        if !message.message_type.is_known() {
            let err = SynapseError::UnknownMessageType(message.message_type.to_string());
            tracing::warn!(
                id = %message.id,
                agent = %message.agent,
                version = %message.version,
                error = %err,
                "dropping message"
            );
            report.unknown += 1;
            return;
        }

        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|registry| registry.get(&message.message_type));

        let Some(handler) = handler else {
            tracing::debug!(
                id = %message.id,
                message_type = %message.message_type,
                "no handler registered"
            );
            report.unhandled += 1;
            return;
        };

        match handler.handle(message).await {
            Ok(()) => report.handled += 1,
            Err(e) => {
                tracing::warn!(
                    id = %message.id,
                    message_type = %message.message_type,
                    error = %e,
                    "message handler failed"
                );
                report.failed += 1;
            }
        }
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

fn log_rejected(err: &SynapseError) {
    tracing::warn!(error = %err, "inbound message rejected");
}

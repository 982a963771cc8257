//! Outbound commands and response correlation.
//!
//! A [`CommandClient`] owns no connection of its own. Messages leave through
//! an injected [`Transport`]; replies come back as ordinary inbound `response`
//! messages and reach the client through a [`ResponseRouter`] registered on
//! the dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use synapse_types::{Result, SynapseError};
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::MessageHandler;
use crate::message::{Message, MessageType, CANVAS_AGENT};
use crate::payload::{CommandPayload, ResponsePayload, TypedPayload};

/// Well-known agent names used as command targets.
pub mod targets {
    pub const EXECUTION_ENGINE: &str = "execution-engine";
    pub const PARSER: &str = "parser";
    pub const COMPILER: &str = "compiler";
    pub const AI_ANNOTATOR: &str = "ai-annotator";
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The outbound edge toward the external agent process.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Transport backed by an in-process channel. The receiving half is handed to
/// whatever actually talks to the agent (a stdio writer, a test, ...).
#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        self.sender
            .send(message.clone())
            .map_err(|_| SynapseError::Transport("outbound channel closed".into()))
    }
}

// ---------------------------------------------------------------------------
// CommandOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOptions {
    pub timeout: Duration,
    pub response_required: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            response_required: true,
        }
    }
}

impl CommandOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fire_and_forget() -> Self {
        Self {
            response_required: false,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// CommandClient
// ---------------------------------------------------------------------------

type PendingMap = Mutex<HashMap<String, oneshot::Sender<ResponsePayload>>>;

struct ClientInner {
    transport: Arc<dyn Transport>,
    agent: String,
    pending: PendingMap,
}

impl ClientInner {
    fn take_pending(&self, id: &str) -> Option<oneshot::Sender<ResponsePayload>> {
        self.pending.lock().ok()?.remove(id)
    }
}

/// Removes the pending entry however the awaiting future ends, including
/// when the caller drops it.
struct PendingSlot<'a> {
    inner: &'a ClientInner,
    id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.take_pending(&self.id);
    }
}

#[derive(Clone)]
pub struct CommandClient {
    inner: Arc<ClientInner>,
}

impl CommandClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_agent(transport, CANVAS_AGENT)
    }

    pub fn with_agent(transport: Arc<dyn Transport>, agent: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                agent: agent.into(),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Send a raw message through the transport.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        message.check()?;
        self.inner.transport.send(message).await
    }

    /// Emit a `command` message to `target`.
    ///
    /// With `response_required` the call waits for the `response` whose
    /// `requestId` matches the command id. No response within the timeout is
    /// a [`SynapseError::CommandTimeout`]; the command is not retried. A
    /// response with `success: false` is a [`SynapseError::CommandFailed`].
    pub async fn send_command(
        &self,
        target: &str,
        command: &str,
        parameters: Value,
        options: CommandOptions,
    ) -> Result<Option<ResponsePayload>> {
        let timeout_ms = options.timeout.as_millis() as u64;
        let payload = CommandPayload {
            command: command.to_string(),
            parameters,
            target: target.to_string(),
            response_required: options.response_required,
            timeout: Some(timeout_ms),
        };
        let message = Message::new(
            MessageType::Command,
            self.inner.agent.clone(),
            serde_json::to_value(&payload)?,
        );

        tracing::debug!(id = %message.id, target, command, "sending command");

        if !options.response_required {
            self.send_message(&message).await?;
            return Ok(None);
        }

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .map_err(|_| SynapseError::Other("pending command map poisoned".into()))?
            .insert(message.id.clone(), tx);
        let _slot = PendingSlot {
            inner: &self.inner,
            id: message.id.clone(),
        };

        self.send_message(&message).await?;

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(response)) if response.success => Ok(Some(response)),
            Ok(Ok(response)) => Err(SynapseError::CommandFailed {
                command: command.to_string(),
                message: response
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            }),
            Ok(Err(_)) => Err(SynapseError::Transport(format!(
                "command '{command}' abandoned before a response arrived"
            ))),
            Err(_) => {
                tracing::warn!(id = %message.id, target, command, timeout_ms, "command timed out");
                Err(SynapseError::CommandTimeout {
                    command: command.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Hand a response to the command waiting on it. Returns `false` when no
    /// command with that id is pending (late or unsolicited reply).
    pub fn resolve_response(&self, response: ResponsePayload) -> bool {
        let request_id = response.request_id.clone();
        match self.inner.take_pending(&request_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(request_id = %request_id, "response matches no pending command");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub async fn request_execution_trace(
        &self,
        file_path: &str,
        language: &str,
    ) -> Result<Option<ResponsePayload>> {
        self.send_command(
            targets::EXECUTION_ENGINE,
            "startTrace",
            json!({ "filePath": file_path, "language": language }),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn request_ast_generation(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Option<ResponsePayload>> {
        self.send_command(
            targets::PARSER,
            "generateAST",
            json!({ "code": code, "language": language }),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn request_cfg_generation(
        &self,
        code: &str,
        language: &str,
    ) -> Result<Option<ResponsePayload>> {
        self.send_command(
            targets::COMPILER,
            "generateCFG",
            json!({ "code": code, "language": language }),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn request_algorithm_simulation(
        &self,
        algorithm: &str,
        data: Value,
    ) -> Result<Option<ResponsePayload>> {
        self.send_command(
            targets::EXECUTION_ENGINE,
            "simulateAlgorithm",
            json!({ "algorithm": algorithm, "data": data }),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn request_ai_annotation(&self, context: Value) -> Result<Option<ResponsePayload>> {
        self.send_command(
            targets::AI_ANNOTATOR,
            "generateAnnotation",
            json!({ "context": context }),
            CommandOptions::default(),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// ResponseRouter
// ---------------------------------------------------------------------------

/// Dispatcher handler for `response` messages.
pub struct ResponseRouter {
    client: CommandClient,
}

impl ResponseRouter {
    pub fn new(client: CommandClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageHandler for ResponseRouter {
    fn message_type(&self) -> MessageType {
        MessageType::Response
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        match message.typed_payload()? {
            TypedPayload::Response(response) => {
                self.client.resolve_response(response);
                Ok(())
            }
            _ => Err(SynapseError::MalformedMessage(format!(
                "message {} is not a response",
                message.id
            ))),
        }
    }
}

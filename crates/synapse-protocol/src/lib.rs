//! Message protocol between the canvas core and external agent processes.
//!
//! Inbound messages are validated at the queue boundary, drained strictly in
//! arrival order, and routed by `type` to registered handlers. Outbound
//! commands go through an injected [`Transport`] and are correlated with their
//! `response` messages by id.

pub mod command;
pub mod dispatch;
pub mod message;
pub mod payload;
pub mod queue;

pub use command::{
    targets, ChannelTransport, CommandClient, CommandOptions, ResponseRouter, Transport,
};
pub use dispatch::{DrainReport, HandlerRegistry, MessageDispatcher, MessageHandler};
pub use message::{Message, MessageType, CANVAS_AGENT, PROTOCOL_VERSION};
pub use payload::{
    AgentAvailability, AgentRunStatus, AiAnnotation, AiAnnotationPayload, AlgorithmStepPayload,
    AstUpdatePayload, CallStackEntry, CallStackUpdatePayload, CfgUpdatePayload, CommandPayload,
    ErrorPayload, ErrorSeverity, ExecutionTracePayload, HeartbeatPayload, ResponsePayload,
    StatusPayload, TypedPayload, VariableState, VariableUpdatePayload, VisualizationUpdatePayload,
};
pub use queue::{MessageQueue, QueueConfig};

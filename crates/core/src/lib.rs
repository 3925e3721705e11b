//! # streamrelay core
//!
//! Domain types, traits, and error definitions for the streamrelay
//! conversation engine. Everything else in the workspace depends inward on
//! this crate.
//!
//! ## Layout
//!
//! - [`message`]: turns and the per-request conversation
//! - [`provider`]: the normalized stream contract every LLM backend speaks
//! - [`tool`]: tool calls, the invoker seam, and an in-process registry
//! - [`memory`]: the history loader and persistence sink seams
//! - [`channel`]: the rate-limited messaging endpoint seam
//! - [`delivery`]: partial-content notifications and the rendezvous channel
//!   between the turn controller and the delivery pipeline
//! - [`metrics`]: the metrics sink seam

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod tool;
pub mod memory;
pub mod delivery;
pub mod metrics;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Role, Turn, TurnContent};
pub use provider::{
    GenerationParams, MergeMode, Provider, ProviderRequest, ProviderResponse, StreamEvent,
    ToolCallFragment,
};
pub use channel::{ChatTarget, MessageId, MessagingEndpoint};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolExecutor, ToolInvoker, ToolOutput, ToolRegistry};
pub use memory::{ExchangeRecord, HistoryLoader, NewRecord, PersistenceSink, RecordStore};
pub use delivery::{MessageInfo, NotificationReceiver, NotificationSender};
pub use metrics::{MetricsSink, NoopMetrics};

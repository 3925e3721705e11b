//! Messaging endpoint seam.
//!
//! An endpoint is the rate-limited surface partial answers are rendered on
//! (a Telegram chat, a terminal). The delivery pipeline only ever creates a
//! message once per segment and edits it afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Identifier of a message on the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the answer to one incoming message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTarget {
    /// The chat (conversation) on the endpoint
    pub chat_id: i64,

    /// The message that triggered the exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl ChatTarget {
    pub fn new(chat_id: i64, reply_to: Option<MessageId>) -> Self {
        Self { chat_id, reply_to }
    }
}

/// A rate-limited messaging surface.
///
/// Both operations report `ChannelError::RateLimited` with the endpoint's
/// retry-after delay, and `ChannelError::FormatRejected` when formatted text
/// could not be parsed by the endpoint.
#[async_trait]
pub trait MessagingEndpoint: Send + Sync {
    /// A human-readable name for this endpoint (e.g., "telegram", "console").
    fn name(&self) -> &str;

    /// Send a new message, replying to `reply_to` when given.
    async fn create_message(
        &self,
        chat_id: i64,
        reply_to: Option<MessageId>,
        text: &str,
        formatted: bool,
    ) -> Result<MessageId, ChannelError>;

    /// Replace the text of an existing message.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
        formatted: bool,
    ) -> Result<(), ChannelError>;
}

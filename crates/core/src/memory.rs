//! History and persistence seams.
//!
//! The turn controller reads the most recent finished exchanges of a user to
//! seed context, and writes one record when an exchange finishes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A stored question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    /// JSON array of the tool-call/result turns executed during the exchange
    #[serde(default)]
    pub tool_trace: String,
    pub token_count: u64,
    pub created_at: DateTime<Utc>,
}

/// A record about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub tool_trace: String,
    pub token_count: u64,
}

/// Reads recent exchanges for a user.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// The last `limit` finished records for `user_id`, oldest first.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ExchangeRecord>, MemoryError>;
}

/// Writes exchanges.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store a record. `is_final` marks a completed answer; only final
    /// records are replayed as history.
    async fn insert_record(
        &self,
        user_id: &str,
        record: NewRecord,
        is_final: bool,
    ) -> Result<i64, MemoryError>;
}

/// A store that is both loader and sink.
pub trait RecordStore: HistoryLoader + PersistenceSink {
    /// A human-readable backend name ("in_memory", "sqlite").
    fn name(&self) -> &str;
}

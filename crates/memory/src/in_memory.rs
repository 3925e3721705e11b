//! In-memory record store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use streamrelay_core::error::MemoryError;
use streamrelay_core::memory::{ExchangeRecord, HistoryLoader, NewRecord, PersistenceSink, RecordStore};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRecord {
    user_id: String,
    is_final: bool,
    record: ExchangeRecord,
}

/// A record store kept in a Vec, lost when the process exits.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<Vec<StoredRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, final or not.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl HistoryLoader for InMemoryRecordStore {
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ExchangeRecord>, MemoryError> {
        let records = self.records.read().await;
        let mut recent: Vec<ExchangeRecord> = records
            .iter()
            .rev()
            .filter(|r| r.is_final && r.user_id == user_id)
            .take(limit)
            .map(|r| r.record.clone())
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[async_trait]
impl PersistenceSink for InMemoryRecordStore {
    async fn insert_record(
        &self,
        user_id: &str,
        record: NewRecord,
        is_final: bool,
    ) -> Result<i64, MemoryError> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(StoredRecord {
            user_id: user_id.to_string(),
            is_final,
            record: ExchangeRecord {
                id,
                question: record.question,
                answer: record.answer,
                tool_trace: record.tool_trace,
                token_count: record.token_count,
                created_at: Utc::now(),
            },
        });
        Ok(id)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &str {
        "in_memory"
    }
}

//! SQLite record store.
//!
//! One table, `exchange_records`, keyed by an autoincrement id. History is
//! read newest-first with a limit and flipped back to chronological order.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use streamrelay_core::error::MemoryError;
use streamrelay_core::memory::{ExchangeRecord, HistoryLoader, NewRecord, PersistenceSink, RecordStore};
use tracing::{debug, info};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite record store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_records (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      TEXT NOT NULL,
                question     TEXT NOT NULL,
                answer       TEXT NOT NULL,
                tool_trace   TEXT NOT NULL DEFAULT '',
                token_count  INTEGER NOT NULL DEFAULT 0,
                is_final     INTEGER NOT NULL DEFAULT 1,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("exchange_records table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_user ON exchange_records(user_id, is_final, id DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("user index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ExchangeRecord, MemoryError> {
        let column = |name: &str, e: sqlx::Error| MemoryError::QueryFailed(format!("{name} column: {e}"));

        let created_at_str: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let token_count: i64 = row.try_get("token_count").map_err(|e| column("token_count", e))?;

        Ok(ExchangeRecord {
            id: row.try_get("id").map_err(|e| column("id", e))?,
            question: row.try_get("question").map_err(|e| column("question", e))?,
            answer: row.try_get("answer").map_err(|e| column("answer", e))?,
            tool_trace: row.try_get("tool_trace").map_err(|e| column("tool_trace", e))?,
            token_count: token_count.max(0) as u64,
            created_at,
        })
    }
}

#[async_trait]
impl HistoryLoader for SqliteRecordStore {
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ExchangeRecord>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, question, answer, tool_trace, token_count, created_at
            FROM exchange_records
            WHERE user_id = ?1 AND is_final = 1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("recent: {e}")))?;

        let mut records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }
}

#[async_trait]
impl PersistenceSink for SqliteRecordStore {
    async fn insert_record(
        &self,
        user_id: &str,
        record: NewRecord,
        is_final: bool,
    ) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO exchange_records (user_id, question, answer, tool_trace, token_count, is_final, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(user_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.tool_trace)
        .bind(i64::try_from(record.token_count).unwrap_or(i64::MAX))
        .bind(is_final)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("insert: {e}")))?;

        let id = result.last_insert_rowid();
        debug!(user_id, id, is_final, "Stored exchange record");
        Ok(id)
    }
}

impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "sqlite"
    }
}

//! Exchange history stores for streamrelay.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryRecordStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;

use std::sync::Arc;
use streamrelay_core::error::MemoryError;
use streamrelay_core::memory::{HistoryLoader, PersistenceSink, RecordStore};

/// One store, handed out as its two collaborator roles.
#[derive(Clone)]
pub struct StoreHandles {
    pub name: String,
    pub history: Arc<dyn HistoryLoader>,
    pub sink: Arc<dyn PersistenceSink>,
}

impl StoreHandles {
    pub fn from_store<S: RecordStore + 'static>(store: S) -> Self {
        let store = Arc::new(store);
        Self {
            name: store.name().to_string(),
            history: store.clone(),
            sink: store,
        }
    }
}

/// Open the backend named `backend` ("sqlite" or "in_memory").
#[cfg_attr(not(feature = "sqlite"), allow(unused_variables))]
pub async fn open(backend: &str, path: &str) -> Result<StoreHandles, MemoryError> {
    match backend {
        "in_memory" => Ok(StoreHandles::from_store(InMemoryRecordStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(StoreHandles::from_store(SqliteRecordStore::new(path).await?)),
        other => Err(MemoryError::Storage(format!(
            "unsupported memory backend '{other}'"
        ))),
    }
}

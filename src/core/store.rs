//! Storage abstractions shared by the in-memory and disk backends

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] fjall::Error),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} record {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("store lock poisoned")]
    Poisoned,
}

/// A named collection of raw key/value pairs.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    /// All entries in ascending key order.
    async fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

pub trait Store: Send + Sync {
    /// Returns the collection with `name`, creating it on first use.
    fn collection(&self, name: &str) -> Result<Arc<dyn KeyValueCollection>, StoreError>;

    /// Makes pending writes durable. No-op for volatile stores.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

use crate::core::store::{KeyValueCollection, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory collection backed by an ordered map.
#[derive(Clone, Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.inner.lock().await;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.inner.lock().await;
        debug!("Memory PUT for key: {:?}", key);
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let map = self.inner.lock().await;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

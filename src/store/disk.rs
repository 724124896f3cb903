use crate::core::store::{KeyValueCollection, StoreError};
use async_trait::async_trait;
use fjall::PartitionHandle;
use tracing::debug;

/// A collection stored in one fjall partition.
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.partition.get(key)?.map(|value| value.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.partition.insert(key, value)?;
        debug!("Disk PUT for key: {:?}", key);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.partition
            .iter()
            .map(|entry| -> Result<(Vec<u8>, Vec<u8>), StoreError> {
                let (key, value) = entry?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }
}

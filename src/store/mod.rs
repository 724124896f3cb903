pub mod disk;
pub mod memory;

use crate::core::store::{KeyValueCollection, Store, StoreError};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions, PersistMode};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::debug;

/// A thread-safe key-value store holding one collection per entity kind.
///
/// Collections live on a fjall keyspace when one is open, in memory otherwise.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    /// Opens (or creates) a persistent store rooted at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!("Opening store at {}", path.display());
        let keyspace = fjall::Config::new(path).open()?;
        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.keyspace.is_some()
    }
}

impl Store for KeyValueStore {
    fn collection(&self, name: &str) -> Result<Arc<dyn KeyValueCollection>, StoreError> {
        if let Some(collection) = self
            .collections
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(name)
        {
            return Ok(Arc::clone(collection));
        }

        let mut collections = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }

        let collection: Arc<dyn KeyValueCollection> = match &self.keyspace {
            Some(keyspace) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())?;
                Arc::new(DiskCollection::new(partition))
            }
            None => Arc::new(MemoryCollection::new()),
        };
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(keyspace) = &self.keyspace {
            keyspace.persist(PersistMode::SyncAll)?;
        }
        Ok(())
    }
}

//! Typed access to entity collections

use crate::core::error::RateSyncError;
use crate::core::model::{Company, Currency, CurrencyRate, Entity, RateSource, RecordId};
use crate::core::store::{KeyValueCollection, Store, StoreError};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

fn encode_id(id: RecordId) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(key: &[u8]) -> Option<RecordId> {
    key.try_into().ok().map(RecordId::from_be_bytes)
}

pub struct Repository<E: Entity> {
    collection: Arc<dyn KeyValueCollection>,
    // Serialises id allocation and read-modify-write updates.
    write_lock: Mutex<()>,
    _marker: PhantomData<E>,
}

impl<E: Entity> Repository<E> {
    pub fn open(store: &dyn Store) -> Result<Self, StoreError> {
        Ok(Self {
            collection: store.collection(E::KIND)?,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<E>, StoreError> {
        match self.collection.get(&encode_id(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Repository::get`] but a missing record is an error.
    pub async fn browse(&self, id: RecordId) -> Result<E, StoreError> {
        self.get(id)
            .await?
            .ok_or(StoreError::NotFound { kind: E::KIND, id })
    }

    pub async fn all(&self) -> Result<Vec<E>, StoreError> {
        self.collection
            .scan()
            .await?
            .iter()
            .map(|(_, value)| serde_json::from_slice(value).map_err(StoreError::from))
            .collect()
    }

    /// Records matching `filter`, in id order.
    pub async fn search<F>(&self, filter: F) -> Result<Vec<E>, StoreError>
    where
        F: Fn(&E) -> bool + Send,
    {
        let mut records = self.all().await?;
        records.retain(|record| filter(record));
        debug!(kind = E::KIND, matches = records.len(), "Search");
        Ok(records)
    }

    /// First record matching `filter`.
    pub async fn find_first<F>(&self, filter: F) -> Result<Option<E>, StoreError>
    where
        F: Fn(&E) -> bool + Send,
    {
        Ok(self.all().await?.into_iter().find(|record| filter(record)))
    }

    /// Stores the record produced by `build` under a freshly allocated id.
    pub async fn create<F>(&self, build: F) -> Result<E, StoreError>
    where
        F: FnOnce(RecordId) -> E + Send,
    {
        let _guard = self.write_lock.lock().await;
        let next_id = self
            .collection
            .scan()
            .await?
            .iter()
            .filter_map(|(key, _)| decode_id(key))
            .max()
            .map_or(1, |id| id + 1);

        let record = build(next_id);
        self.collection
            .put(&encode_id(next_id), &serde_json::to_vec(&record)?)
            .await?;
        debug!(kind = E::KIND, id = next_id, "Created record");
        Ok(record)
    }

    /// Applies `apply` to the stored record and writes it back.
    pub async fn update<F>(&self, id: RecordId, apply: F) -> Result<E, StoreError>
    where
        F: FnOnce(&mut E) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.browse(id).await?;
        apply(&mut record);
        self.collection
            .put(&encode_id(id), &serde_json::to_vec(&record)?)
            .await?;
        debug!(kind = E::KIND, id, "Updated record");
        Ok(record)
    }
}

/// Returns the single record of `records`, or an error naming how many there were.
pub fn ensure_one<E: Entity>(records: &[E]) -> Result<&E, RateSyncError> {
    match records {
        [record] => Ok(record),
        _ => Err(RateSyncError::NotExactlyOne {
            kind: E::KIND,
            count: records.len(),
        }),
    }
}

/// The repositories for every entity kind, opened on one store.
pub struct Repositories {
    pub currencies: Repository<Currency>,
    pub companies: Repository<Company>,
    pub sources: Repository<RateSource>,
    pub rates: Repository<CurrencyRate>,
}

impl Repositories {
    pub fn open(store: &dyn Store) -> Result<Self, StoreError> {
        Ok(Self {
            currencies: Repository::open(store)?,
            companies: Repository::open(store)?,
            sources: Repository::open(store)?,
            rates: Repository::open(store)?,
        })
    }
}

//! Core abstractions: entities, storage seams, configuration and errors

pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod repository;
pub mod store;

// Re-export main types for cleaner imports
pub use clock::{Clock, SystemClock};
pub use error::{FetchError, RateSyncError};
pub use model::{AuditFields, Company, Currency, CurrencyRate, Entity, RateSource, RecordId};
pub use repository::{Repositories, Repository, ensure_one};
pub use store::{KeyValueCollection, Store, StoreError};

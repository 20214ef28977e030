//! Durable retention for the EdgeFlow store-and-forward feature.
//!
//! This crate holds the persisted data model ([`StoredObject`]), the
//! abstract store contract ([`StoreClient`]) with redb and in-memory
//! backends, and the [`StoreForward`] engine that retries retained
//! payloads on a background schedule.

pub mod backends;
pub mod error;
pub mod forward;
pub mod object;

pub use backends::memory::MemoryStoreClient;
pub use backends::redb::RedbStoreClient;
pub use error::{Result, StoreError};
pub use forward::{RetryExecutor, StoreForward};
pub use object::StoredObject;

/// Abstract contract for the store-and-forward backend.
///
/// Backends are synchronous; the retry engine calls them from its own
/// task between awaits. Implementations must preserve every
/// [`StoredObject`] field byte-for-byte across a round trip, and must
/// reject stores whose pre-assigned id already exists.
pub trait StoreClient: Send + Sync {
    /// Persist an object, assigning an id if absent. Returns the id.
    fn store(&self, object: &StoredObject) -> Result<String>;

    /// Load every object for the given app service key.
    fn retrieve_from_store(&self, app_service_key: &str) -> Result<Vec<StoredObject>>;

    /// Overwrite an existing object.
    fn update(&self, object: &StoredObject) -> Result<()>;

    /// Remove an object.
    fn remove_from_store(&self, object: &StoredObject) -> Result<()>;

    /// Release any backend resources.
    fn disconnect(&self) -> Result<()>;
}

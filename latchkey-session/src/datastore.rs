//! Datastore trait definition.

use crate::error::SessionResult;
use crate::record::StoredRecord;
use async_trait::async_trait;

/// Persistent storage for session records, keyed by session id.
///
/// A single datastore is shared by every request, so implementations must
/// be safe for concurrent use. [`try_insert`](Self::try_insert) is the only
/// operation that needs true mutual exclusion and must be atomic.
///
/// Implementations treat records whose `expired` deadline has passed as
/// absent, either natively (a key TTL) or by checking the deadline.
///
/// # Examples
///
/// ```
/// use latchkey_session::{Datastore, MemoryDatastore, StoredRecord};
///
/// # tokio_test_block_on(async {
/// let store = MemoryDatastore::new();
/// let record = StoredRecord {
///     id: "abc".into(),
///     expired: chrono::Utc::now() + chrono::Duration::seconds(60),
///     payload: Vec::new(),
/// };
///
/// assert!(store.try_insert(&record).await?);
/// assert!(!store.try_insert(&record).await?);
/// assert!(store.exists("abc").await?);
/// # Ok::<(), latchkey_session::SessionError>(())
/// # }).unwrap();
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Insert `record` only if no live record exists under its id.
    ///
    /// Returns `Ok(false)` when the key is taken. Transport failures are
    /// reported as errors, never as `Ok(false)`.
    async fn try_insert(&self, record: &StoredRecord) -> SessionResult<bool>;

    /// Fetch the record stored under `id`.
    async fn get(&self, id: &str) -> SessionResult<Option<StoredRecord>>;

    /// Insert or overwrite the record under its id.
    ///
    /// Returns the number of errors the store reported; anything above zero
    /// means the write conflicted with another record.
    async fn replace(&self, record: &StoredRecord) -> SessionResult<u64>;

    /// Delete the record under `id`. Deleting a missing id is a no-op.
    async fn delete(&self, id: &str) -> SessionResult<()>;

    /// Check whether a live record exists under `id`.
    async fn exists(&self, id: &str) -> SessionResult<bool>;

    /// Remove expired records.
    ///
    /// Stores with native expiry have nothing to do and return 0.
    async fn purge_expired(&self) -> SessionResult<usize> {
        Ok(0)
    }
}

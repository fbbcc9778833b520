//! Session store: id allocation and datastore synchronization.
//!
//! The datastore is the single source of truth. Nothing is cached between
//! requests; every accessor on a [`SessionState`](crate::SessionState) goes
//! through [`SessionStore::synchronize`], which rewrites the full record with
//! a fresh expiry deadline. That keeps read-only sessions alive without an
//! expiry daemon at the cost of one write per access.

use crate::config::DEFAULT_MAX_ID_ATTEMPTS;
use crate::datastore::Datastore;
use crate::error::{SessionError, SessionResult};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::record::{JsonSerializer, PayloadSerializer, SessionRecord, StoredRecord};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Which side of an accessor triggered a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The accessor mutated the payload; the new state must be persisted.
    WriteThrough,
    /// The accessor only read; the expiry deadline must be pushed back.
    ReadThrough,
}

impl SyncMode {
    fn as_str(&self) -> &'static str {
        match self {
            SyncMode::WriteThrough => "write-through",
            SyncMode::ReadThrough => "read-through",
        }
    }
}

/// Orchestrates id allocation and record synchronization against a shared
/// [`Datastore`].
///
/// Cheap to share: wrap it in an [`Arc`] once at startup and hand it to
/// every request.
pub struct SessionStore {
    datastore: Arc<dyn Datastore>,
    serializer: Arc<dyn PayloadSerializer>,
    id_generator: Arc<dyn IdGenerator>,
    timeout: u64,
    max_id_attempts: usize,
    operation_timeout: Option<Duration>,
}

impl SessionStore {
    /// Create a store over `datastore` with a JSON serializer, random ids
    /// and a 1200 second inactivity timeout.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            serializer: Arc::new(JsonSerializer),
            id_generator: Arc::new(RandomIdGenerator),
            timeout: crate::config::DEFAULT_TIMEOUT,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            operation_timeout: None,
        }
    }

    /// Set the payload serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the id generator.
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Set the inactivity timeout for newly allocated sessions. Raised to
    /// at least one second.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds.max(1);
        self
    }

    /// Set how many candidate ids one allocation may try.
    pub fn with_max_id_attempts(mut self, attempts: usize) -> Self {
        self.max_id_attempts = attempts.max(1);
        self
    }

    /// Apply a timeout to every datastore call.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Inactivity timeout given to new sessions, in seconds.
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// The underlying datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Allocate a fresh id and insert an empty record under it.
    ///
    /// Candidates that collide with an existing key are discarded and
    /// another one is generated, up to the configured attempt bound. A
    /// datastore failure ends allocation immediately.
    pub async fn allocate_unique_id(&self) -> SessionResult<String> {
        for attempt in 1..=self.max_id_attempts {
            let id = self.id_generator.generate();
            let record = SessionRecord::new(&id, self.timeout);
            let stored = self.encode(&record)?;

            if self.call(self.datastore.try_insert(&stored)).await? {
                debug!(session_id = %id, attempt, "Allocated session id");
                return Ok(id);
            }

            debug!(session_id = %id, attempt, "Session id collision, retrying");
        }

        warn!(
            attempts = self.max_id_attempts,
            "Gave up allocating a unique session id"
        );
        Err(SessionError::IdAllocationExhausted {
            attempts: self.max_id_attempts,
        })
    }

    /// Check whether a live record exists for `id`.
    pub async fn exists(&self, id: &str) -> SessionResult<bool> {
        self.call(self.datastore.exists(id)).await
    }

    /// Fetch and decode the record for `id`.
    pub async fn load(&self, id: &str) -> SessionResult<SessionRecord> {
        let stored = self
            .call(self.datastore.get(id))
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        debug!(session_id = %id, "Materialized session");
        self.decode(stored)
    }

    /// Persist `record` with an expiry deadline recomputed from now.
    ///
    /// Used after every accessor: `mode` records whether the accessor
    /// mutated the payload or only read it. A nonzero error count from the
    /// datastore is reported as [`SessionError::Conflict`].
    pub async fn synchronize(&self, record: &SessionRecord, mode: SyncMode) -> SessionResult<()> {
        let stored = self.encode(record)?;
        let errors = self.call(self.datastore.replace(&stored)).await?;

        if errors > 0 {
            warn!(
                session_id = %record.id,
                errors,
                mode = mode.as_str(),
                "Session replace reported errors"
            );
            return Err(SessionError::Conflict(record.id.clone()));
        }

        debug!(session_id = %record.id, mode = mode.as_str(), expires = %stored.expired, "Synchronized session");
        Ok(())
    }

    /// Delete the record for `id`.
    pub async fn delete(&self, id: &str) -> SessionResult<()> {
        self.call(self.datastore.delete(id)).await
    }

    /// Remove expired records from the datastore.
    pub async fn purge_expired(&self) -> SessionResult<usize> {
        self.call(self.datastore.purge_expired()).await
    }

    fn encode(&self, record: &SessionRecord) -> SessionResult<StoredRecord> {
        Ok(StoredRecord {
            id: record.id.clone(),
            expired: record.deadline_from(Utc::now()),
            payload: self.serializer.serialize(&record.to_payload())?,
        })
    }

    fn decode(&self, stored: StoredRecord) -> SessionResult<SessionRecord> {
        let payload = self.serializer.deserialize(&stored.payload)?;
        Ok(SessionRecord::from_payload(stored.id, payload))
    }

    async fn call<T, F>(&self, operation: F) -> SessionResult<T>
    where
        F: Future<Output = SessionResult<T>>,
    {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| SessionError::Timeout)?,
            None => operation.await,
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("timeout", &self.timeout)
            .field("max_id_attempts", &self.max_id_attempts)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

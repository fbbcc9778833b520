//! Request-scoped session handle.

use crate::error::{SessionError, SessionResult};
use crate::record::SessionRecord;
use crate::store::{SessionStore, SyncMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Session key holding the CSRF token.
pub const CSRF_TOKEN_KEY: &str = "_csrft_";

/// Prefix of session keys holding flash message queues.
pub const FLASH_KEY_PREFIX: &str = "_f_";

/// Bytes of entropy in a CSRF token.
const CSRF_TOKEN_BYTES: usize = 20;

#[derive(Debug)]
enum State {
    /// Bound to an id whose record has not been fetched yet.
    Unloaded(String),
    /// Record fetched and held in memory.
    Active(SessionRecord),
    /// Record deleted; the next access allocates a new session.
    Invalidated { previous_id: String },
}

/// In-memory handle over one session record, owned by a single request.
///
/// The record is fetched lazily on first access. Every accessor then
/// synchronizes with the datastore: mutating accessors persist the new
/// payload (write-through), reading accessors push back the expiry deadline
/// (read-through). After [`invalidate`](Self::invalidate), any access
/// allocates a brand-new session instead of resurrecting the deleted one.
#[derive(Debug)]
pub struct SessionState {
    store: Arc<SessionStore>,
    state: State,
    new: bool,
}

impl SessionState {
    /// Bind a handle to `id`. Nothing is fetched until the first access.
    pub fn new(store: Arc<SessionStore>, id: impl Into<String>, new: bool) -> Self {
        Self {
            store,
            state: State::Unloaded(id.into()),
            new,
        }
    }

    /// Whether this handle's id was allocated during the current request.
    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Whether the session was invalidated and no replacement has been
    /// allocated yet.
    pub fn is_invalidated(&self) -> bool {
        matches!(self.state, State::Invalidated { .. })
    }

    /// The bound id without touching the datastore, `None` while
    /// invalidated.
    pub fn current_id(&self) -> Option<&str> {
        match &self.state {
            State::Unloaded(id) => Some(id),
            State::Active(record) => Some(&record.id),
            State::Invalidated { .. } => None,
        }
    }

    /// The session id, allocating a new session if invalidated.
    pub async fn id(&mut self) -> SessionResult<String> {
        Ok(self.record().await?.id.clone())
    }

    /// When the session was created.
    pub async fn created(&mut self) -> SessionResult<DateTime<Utc>> {
        Ok(self.record().await?.created)
    }

    /// The session's inactivity timeout in seconds.
    pub async fn timeout(&mut self) -> SessionResult<u64> {
        Ok(self.record().await?.timeout)
    }

    /// Delete the backing record. The next access allocates a new session.
    pub async fn invalidate(&mut self) -> SessionResult<()> {
        let id = match &self.state {
            State::Unloaded(id) => id.clone(),
            State::Active(record) => record.id.clone(),
            State::Invalidated { previous_id } => previous_id.clone(),
        };

        self.store.delete(&id).await?;
        self.state = State::Invalidated { previous_id: id.clone() };
        info!(session_id = %id, "Session invalidated");
        Ok(())
    }

    // ========== Read-through accessors ==========

    /// Get a value.
    pub async fn get(&mut self, key: &str) -> SessionResult<Option<Value>> {
        self.read(|record| record.payload.get(key).cloned()).await
    }

    /// Get a value, deserialized into `T`. Values of another shape read as
    /// `None`.
    pub async fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> SessionResult<Option<T>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Check if a key exists.
    pub async fn contains(&mut self, key: &str) -> SessionResult<bool> {
        self.read(|record| record.payload.contains_key(key)).await
    }

    /// All keys.
    pub async fn keys(&mut self) -> SessionResult<Vec<String>> {
        self.read(|record| record.payload.keys().cloned().collect())
            .await
    }

    /// All values.
    pub async fn values(&mut self) -> SessionResult<Vec<Value>> {
        self.read(|record| record.payload.values().cloned().collect())
            .await
    }

    /// All key-value pairs.
    pub async fn items(&mut self) -> SessionResult<Vec<(String, Value)>> {
        self.read(|record| {
            record
                .payload
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .await
    }

    /// Number of keys.
    pub async fn len(&mut self) -> SessionResult<usize> {
        self.read(|record| record.payload.len()).await
    }

    /// Check if the session holds no data.
    pub async fn is_empty(&mut self) -> SessionResult<bool> {
        self.read(|record| record.payload.is_empty()).await
    }

    // ========== Write-through accessors ==========

    /// Set a value, returning the previous one.
    pub async fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> SessionResult<Option<Value>> {
        let value = to_value(value)?;
        let key = key.into();
        self.write(|record| Ok(record.payload.insert(key, value)))
            .await
    }

    /// Remove a key that must exist.
    ///
    /// Fails with [`SessionError::KeyNotFound`] without touching the
    /// datastore if the key is absent.
    pub async fn delete(&mut self, key: &str) -> SessionResult<()> {
        self.write(|record| {
            record
                .payload
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| SessionError::KeyNotFound(key.to_string()))
        })
        .await
    }

    /// Return the value under `key`, inserting `default` first if absent.
    pub async fn set_default<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        default: T,
    ) -> SessionResult<Value> {
        let default = to_value(default)?;
        let key = key.into();
        self.write(|record| Ok(record.payload.entry(key).or_insert(default).clone()))
            .await
    }

    /// Remove all keys.
    pub async fn clear(&mut self) -> SessionResult<()> {
        self.write(|record| {
            record.payload.clear();
            Ok(())
        })
        .await
    }

    /// Merge key-value pairs into the session.
    pub async fn update<I>(&mut self, entries: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.write(|record| {
            record.payload.extend(entries);
            Ok(())
        })
        .await
    }

    /// Remove a key, returning its value if it was present.
    pub async fn pop(&mut self, key: &str) -> SessionResult<Option<Value>> {
        self.write(|record| Ok(record.payload.remove(key))).await
    }

    /// Remove and return an arbitrary key-value pair.
    pub async fn pop_item(&mut self) -> SessionResult<Option<(String, Value)>> {
        self.write(|record| {
            let key = record.payload.keys().next().cloned();
            Ok(key.and_then(|key| record.payload.remove_entry(&key)))
        })
        .await
    }

    /// Persist the session as held in memory, overwriting whatever the
    /// datastore has for this id.
    pub async fn changed(&mut self) -> SessionResult<()> {
        self.write(|_| Ok(())).await
    }

    /// Change this session's inactivity timeout.
    pub async fn adjust_timeout(&mut self, seconds: u64) -> SessionResult<()> {
        if seconds == 0 {
            return Err(SessionError::InvalidTimeout(seconds));
        }
        self.write(|record| {
            record.timeout = seconds;
            Ok(())
        })
        .await
    }

    // ========== CSRF and flash messages ==========

    /// Store and return a fresh CSRF token.
    pub async fn new_csrf_token(&mut self) -> SessionResult<String> {
        let token = crate::id::random_hex(CSRF_TOKEN_BYTES);
        self.insert(CSRF_TOKEN_KEY, &token).await?;
        Ok(token)
    }

    /// Return the stored CSRF token, creating one if none exists.
    pub async fn get_csrf_token(&mut self) -> SessionResult<String> {
        match self.get_as::<String>(CSRF_TOKEN_KEY).await? {
            Some(token) => Ok(token),
            None => self.new_csrf_token().await,
        }
    }

    /// Append a message to a flash queue.
    pub async fn flash<T: Serialize>(
        &mut self,
        message: T,
        queue: &str,
        allow_duplicate: bool,
    ) -> SessionResult<()> {
        let message = to_value(message)?;
        let key = flash_key(queue);
        self.write(|record| {
            let entry = record
                .payload
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(messages) = entry
                && (allow_duplicate || !messages.contains(&message))
            {
                messages.push(message);
            }
            Ok(())
        })
        .await
    }

    /// Messages in a flash queue, left in place.
    pub async fn peek_flash(&mut self, queue: &str) -> SessionResult<Vec<Value>> {
        let key = flash_key(queue);
        self.read(|record| flash_messages(record.payload.get(&key).cloned()))
            .await
    }

    /// Messages in a flash queue, removing the queue.
    pub async fn pop_flash(&mut self, queue: &str) -> SessionResult<Vec<Value>> {
        let key = flash_key(queue);
        self.write(|record| Ok(flash_messages(record.payload.remove(&key))))
            .await
    }

    // ========== Synchronization ==========

    async fn read<R>(&mut self, f: impl FnOnce(&SessionRecord) -> R) -> SessionResult<R> {
        let store = Arc::clone(&self.store);
        let record = self.record().await?;
        let output = f(record);
        store.synchronize(record, SyncMode::ReadThrough).await?;
        Ok(output)
    }

    /// Apply `f` to a copy of the record and persist the copy. The in-memory
    /// record only changes once the datastore accepted the write; nothing is
    /// written if `f` fails.
    async fn write<R>(
        &mut self,
        f: impl FnOnce(&mut SessionRecord) -> SessionResult<R>,
    ) -> SessionResult<R> {
        let store = Arc::clone(&self.store);
        let record = self.record().await?;
        let mut staged = record.clone();
        let output = f(&mut staged)?;
        store.synchronize(&staged, SyncMode::WriteThrough).await?;
        *record = staged;
        Ok(output)
    }

    /// The in-memory record, fetching it on first use and allocating a new
    /// session if this one was invalidated.
    async fn record(&mut self) -> SessionResult<&mut SessionRecord> {
        if let State::Invalidated { .. } = self.state {
            let id = self.store.allocate_unique_id().await?;
            self.state = State::Unloaded(id);
            self.new = true;
        }

        if let State::Unloaded(id) = &self.state {
            let record = self.store.load(id).await?;
            self.state = State::Active(record);
        }

        match &mut self.state {
            State::Active(record) => Ok(record),
            _ => Err(SessionError::NotFound(
                "session state was not materialized".to_string(),
            )),
        }
    }
}

fn to_value<T: Serialize>(value: T) -> SessionResult<Value> {
    serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))
}

fn flash_key(queue: &str) -> String {
    format!("{}{}", FLASH_KEY_PREFIX, queue)
}

fn flash_messages(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(messages)) => messages,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Datastore;
    use crate::memory_store::MemoryDatastore;
    use serde_json::json;

    async fn fresh_session() -> (Arc<MemoryDatastore>, Arc<SessionStore>, SessionState) {
        let datastore = Arc::new(MemoryDatastore::new());
        let store = Arc::new(SessionStore::new(datastore.clone()));
        let id = store.allocate_unique_id().await.unwrap();
        let session = SessionState::new(store.clone(), id, true);
        (datastore, store, session)
    }

    #[tokio::test]
    async fn test_lazy_materialization() {
        let datastore = Arc::new(MemoryDatastore::new());
        let store = Arc::new(SessionStore::new(datastore.clone()));

        // binding to an unknown id does not touch the datastore
        let mut session = SessionState::new(store, "unknown", false);
        assert_eq!(session.current_id(), Some("unknown"));

        let err = session.get("k").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (_, store, mut session) = fresh_session().await;
        assert_eq!(session.insert("user_id", 123).await.unwrap(), None);
        assert_eq!(session.insert("user_id", 124).await.unwrap(), Some(json!(123)));

        assert_eq!(session.get("user_id").await.unwrap(), Some(json!(124)));
        assert_eq!(session.get_as::<i32>("user_id").await.unwrap(), Some(124));
        assert_eq!(session.get_as::<String>("user_id").await.unwrap(), None);

        let id = session.id().await.unwrap();
        let fresh = store.load(&id).await.unwrap();
        assert_eq!(fresh.payload.get("user_id"), Some(&json!(124)));
    }

    #[tokio::test]
    async fn test_dict_operations() {
        let (_, _, mut session) = fresh_session().await;

        session
            .update([("a".to_string(), json!(1)), ("b".to_string(), json!(2))])
            .await
            .unwrap();
        assert!(session.contains("a").await.unwrap());
        assert_eq!(session.len().await.unwrap(), 2);

        let mut keys = session.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        assert_eq!(session.set_default("a", 9).await.unwrap(), json!(1));
        assert_eq!(session.set_default("c", 3).await.unwrap(), json!(3));

        assert_eq!(session.pop("c").await.unwrap(), Some(json!(3)));
        assert_eq!(session.pop("c").await.unwrap(), None);

        session.delete("b").await.unwrap();
        assert!(matches!(
            session.delete("b").await,
            Err(SessionError::KeyNotFound(_))
        ));

        assert_eq!(
            session.pop_item().await.unwrap(),
            Some(("a".to_string(), json!(1)))
        );
        assert_eq!(session.pop_item().await.unwrap(), None);
        assert!(session.is_empty().await.unwrap());

        session.insert("x", "y").await.unwrap();
        session.clear().await.unwrap();
        assert!(session.items().await.unwrap().is_empty());
        assert!(session.values().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_allocates_new_id() {
        let (datastore, _, mut session) = fresh_session().await;
        let original = session.id().await.unwrap();
        session.insert("k", "v").await.unwrap();

        session.invalidate().await.unwrap();
        assert!(session.is_invalidated());
        assert_eq!(session.current_id(), None);
        assert!(!datastore.exists(&original).await.unwrap());

        // second invalidation is harmless
        session.invalidate().await.unwrap();

        assert_eq!(session.get("k").await.unwrap(), None);
        let replacement = session.id().await.unwrap();
        assert_ne!(replacement, original);
        assert!(session.is_new());
        assert!(!session.is_invalidated());
        assert!(datastore.exists(&replacement).await.unwrap());
    }

    #[tokio::test]
    async fn test_adjust_timeout() {
        let (_, store, mut session) = fresh_session().await;
        session.adjust_timeout(60).await.unwrap();
        assert_eq!(session.timeout().await.unwrap(), 60);

        let id = session.id().await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().timeout, 60);
        assert!(matches!(
            session.adjust_timeout(0).await,
            Err(SessionError::InvalidTimeout(0))
        ));
        assert_eq!(store.load(&id).await.unwrap().timeout, 60);
    }

    #[tokio::test]
    async fn test_csrf_token() {
        let (_, _, mut session) = fresh_session().await;
        let token = session.get_csrf_token().await.unwrap();
        assert_eq!(token.len(), 40);
        assert_eq!(session.get_csrf_token().await.unwrap(), token);

        let rotated = session.new_csrf_token().await.unwrap();
        assert_ne!(rotated, token);
        assert_eq!(session.get_csrf_token().await.unwrap(), rotated);
    }

    #[tokio::test]
    async fn test_flash_queues() {
        let (_, _, mut session) = fresh_session().await;
        session.flash("saved", "", true).await.unwrap();
        session.flash("saved", "", false).await.unwrap();
        session.flash("saved", "", true).await.unwrap();
        session.flash("oops", "errors", true).await.unwrap();

        assert_eq!(
            session.peek_flash("").await.unwrap(),
            vec![json!("saved"), json!("saved")]
        );
        assert_eq!(session.pop_flash("errors").await.unwrap(), vec![json!("oops")]);
        assert!(session.pop_flash("errors").await.unwrap().is_empty());
        assert_eq!(session.peek_flash("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_created_is_stable() {
        let (_, _, mut session) = fresh_session().await;
        let created = session.created().await.unwrap();
        session.insert("k", 1).await.unwrap();
        session.changed().await.unwrap();
        assert_eq!(session.created().await.unwrap(), created);
    }
}

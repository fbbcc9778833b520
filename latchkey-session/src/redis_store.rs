//! Redis datastore implementation.

use crate::config::DatastoreConfig;
use crate::datastore::Datastore;
use crate::error::{SessionError, SessionResult};
use crate::record::StoredRecord;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

/// Redis-backed datastore.
///
/// Each record is stored as JSON under `{namespace}:{id}` with a native key
/// TTL matching its deadline, so expired sessions vanish without a sweep.
/// Insert-if-absent uses `SET NX`.
///
/// # Examples
///
/// ```no_run
/// use latchkey_session::{DatastoreConfig, RedisDatastore, SessionConfig, SessionFactory};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), latchkey_session::SessionError> {
///     let datastore = DatastoreConfig::parse_url("redis://localhost:6379/0")?
///         .with_namespace("myapp:sessions");
///     let redis = RedisDatastore::connect(&datastore).await?;
///
///     let factory = SessionFactory::new(SessionConfig::new("s3cret"), Arc::new(redis))?;
///     let mut request = factory.open(None).await?;
///     request.session().insert("user_id", 123).await?;
///     Ok(())
/// }
/// ```
pub struct RedisDatastore {
    conn: ConnectionManager,
    config: DatastoreConfig,
}

impl RedisDatastore {
    /// Connect and verify the server answers `PING`.
    ///
    /// Connection setup is bounded by
    /// [`DatastoreConfig::connection_timeout`].
    pub async fn connect(config: &DatastoreConfig) -> SessionResult<Self> {
        let client = redis::Client::open(config.connection_url())
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let mut conn = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            namespace = %config.namespace,
            "Redis session datastore connected"
        );

        Ok(Self {
            conn,
            config: config.clone(),
        })
    }

    /// The datastore configuration.
    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    fn key(&self, id: &str) -> String {
        self.config.session_key(id)
    }
}

/// Milliseconds until the deadline, `None` once it has passed.
fn ttl_millis(record: &StoredRecord) -> Option<u64> {
    let millis = record.remaining().as_millis();
    (millis > 0).then(|| u64::try_from(millis).unwrap_or(u64::MAX))
}

/// TTL for an insert. A record already past its deadline still takes the
/// key for the shortest TTL so it is never mistaken for a collision.
fn insert_ttl_millis(record: &StoredRecord) -> u64 {
    ttl_millis(record).unwrap_or(1)
}

fn encode(record: &StoredRecord) -> SessionResult<String> {
    serde_json::to_string(record).map_err(|e| SessionError::Serialization(e.to_string()))
}

#[async_trait]
impl Datastore for RedisDatastore {
    async fn try_insert(&self, record: &StoredRecord) -> SessionResult<bool> {
        let ttl = insert_ttl_millis(record);
        let json = encode(record)?;
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(&record.id))
            .arg(json)
            .arg("NX")
            .arg("PX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, id: &str) -> SessionResult<Option<StoredRecord>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.key(id)).await?;

        match data {
            Some(json) => {
                let record: StoredRecord = serde_json::from_str(&json)
                    .map_err(|e| SessionError::Deserialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn replace(&self, record: &StoredRecord) -> SessionResult<u64> {
        let key = self.key(&record.id);
        let mut conn = self.conn.clone();

        match ttl_millis(record) {
            Some(ttl) => {
                let json = encode(record)?;
                let _: () = conn.pset_ex(&key, json, ttl).await?;
            }
            None => {
                debug!(session_id = %record.id, "Replacing with an expired record, deleting key");
                let _: () = conn.del(&key).await?;
            }
        }

        Ok(0)
    }

    async fn delete(&self, id: &str) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(id)).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> SessionResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(id)).await?;
        Ok(exists)
    }
}

impl std::fmt::Debug for RedisDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDatastore")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}

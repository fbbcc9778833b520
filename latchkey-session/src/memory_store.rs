//! In-process datastore.

use crate::datastore::Datastore;
use crate::error::SessionResult;
use crate::record::StoredRecord;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// Datastore backed by a concurrent in-process map.
///
/// Suitable for tests and single-process deployments. Expired records stay
/// in the map until overwritten or removed by
/// [`purge_expired`](Datastore::purge_expired), but are never returned.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    records: DashMap<String, StoredRecord>,
}

impl MemoryDatastore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn try_insert(&self, record: &StoredRecord) -> SessionResult<bool> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired() {
                    entry.insert(record.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &str) -> SessionResult<Option<StoredRecord>> {
        Ok(self
            .records
            .get(id)
            .filter(|record| !record.is_expired())
            .map(|record| record.clone()))
    }

    async fn replace(&self, record: &StoredRecord) -> SessionResult<u64> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(0)
    }

    async fn delete(&self, id: &str) -> SessionResult<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> SessionResult<bool> {
        Ok(self
            .records
            .get(id)
            .is_some_and(|record| !record.is_expired()))
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired_at(now));
        let purged = before.saturating_sub(self.records.len());
        debug!(purged, "Purged expired sessions");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, ttl_secs: i64) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            expired: Utc::now() + Duration::seconds(ttl_secs),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryDatastore::new();
        assert!(store.try_insert(&record("a", 60)).await.unwrap());
        assert!(!store.try_insert(&record("a", 60)).await.unwrap());
        assert!(store.try_insert(&record("b", 60)).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_record_is_absent() {
        let store = MemoryDatastore::new();
        store.replace(&record("old", -1)).await.unwrap();

        assert!(!store.exists("old").await.unwrap());
        assert!(store.get("old").await.unwrap().is_none());
        // an expired key can be claimed again
        assert!(store.try_insert(&record("old", 60)).await.unwrap());
        assert!(store.exists("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let store = MemoryDatastore::new();
        let mut rec = record("a", 60);
        assert_eq!(store.replace(&rec).await.unwrap(), 0);

        rec.payload = b"{\"x\":1}".to_vec();
        store.replace(&rec).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().payload, rec.payload);

        store.delete("a").await.unwrap();
        assert!(!store.exists("a").await.unwrap());
        // deleting again is a no-op
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryDatastore::new();
        store.replace(&record("live", 60)).await.unwrap();
        store.replace(&record("dead1", -5)).await.unwrap();
        store.replace(&record("dead2", -5)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.exists("live").await.unwrap());
    }
}

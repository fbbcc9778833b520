//! Session data model.
//!
//! [`SessionRecord`] is the in-memory form of one session. What reaches the
//! datastore is a [`StoredRecord`]: the id, an absolute expiry deadline, and
//! the opaque bytes produced by a [`PayloadSerializer`] from a
//! [`SessionPayload`].

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key-value payload of a session.
pub type ManagedDict = HashMap<String, serde_json::Value>;

/// One session as held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Unique session identifier, fixed at allocation
    pub id: String,
    /// Session data as key-value pairs
    pub payload: ManagedDict,
    /// Creation timestamp, fixed at allocation
    pub created: DateTime<Utc>,
    /// Permitted inactivity in seconds
    pub timeout: u64,
}

impl SessionRecord {
    /// Create an empty record created now.
    pub fn new(id: impl Into<String>, timeout: u64) -> Self {
        Self {
            id: id.into(),
            payload: ManagedDict::new(),
            created: Utc::now(),
            timeout,
        }
    }

    /// Deadline after which the record counts as expired if it is not
    /// accessed again, measured from `now`.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.timeout)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The serializable part of the record.
    pub fn to_payload(&self) -> SessionPayload {
        SessionPayload {
            managed_dict: self.payload.clone(),
            created: self.created,
            timeout: self.timeout,
        }
    }

    /// Rebuild a record from its id and deserialized payload.
    pub fn from_payload(id: impl Into<String>, payload: SessionPayload) -> Self {
        Self {
            id: id.into(),
            payload: payload.managed_dict,
            created: payload.created,
            timeout: payload.timeout,
        }
    }
}

/// The part of a session that goes through the payload serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Session data
    pub managed_dict: ManagedDict,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Permitted inactivity in seconds
    pub timeout: u64,
}

/// Persisted layout of a session in the datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Session identifier (primary key)
    pub id: String,
    /// Absolute expiry deadline
    pub expired: DateTime<Utc>,
    /// Serialized [`SessionPayload`]
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl StoredRecord {
    /// Check whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check whether the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expired
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expired - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Encodes and decodes session payloads for storage.
pub trait PayloadSerializer: Send + Sync {
    /// Encode a payload into bytes.
    fn serialize(&self, payload: &SessionPayload) -> SessionResult<Vec<u8>>;

    /// Decode bytes produced by [`serialize`](Self::serialize).
    fn deserialize(&self, bytes: &[u8]) -> SessionResult<SessionPayload>;
}

/// JSON payload serializer (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl PayloadSerializer for JsonSerializer {
    fn serialize(&self, payload: &SessionPayload) -> SessionResult<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> SessionResult<SessionPayload> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Deserialization(e.to_string()))
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_with(dict: serde_json::Value) -> SessionPayload {
        let managed_dict = match dict {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => ManagedDict::new(),
        };
        SessionPayload {
            managed_dict,
            created: Utc::now(),
            timeout: 1200,
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let serializer = JsonSerializer;
        let cases = [
            json!({}),
            json!({"user_id": 42, "name": "alice"}),
            json!({"cart": {"items": [1, 2, {"sku": "x"}], "total": 9.5}, "flag": null}),
            json!({"greeting": "こんにちは", "emoji": "🦀", "accent": "café"}),
        ];

        for case in cases {
            let payload = payload_with(case);
            let bytes = serializer.serialize(&payload).unwrap();
            assert_eq!(serializer.deserialize(&bytes).unwrap(), payload);
        }
    }

    #[test]
    fn test_deserialize_garbage() {
        let err = JsonSerializer.deserialize(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, SessionError::Deserialization(_)));
    }

    #[test]
    fn test_record_payload_conversion() {
        let mut record = SessionRecord::new("abc", 60);
        record.payload.insert("k".into(), json!("v"));
        let rebuilt = SessionRecord::from_payload("abc", record.to_payload());
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_deadline_uses_timeout() {
        let record = SessionRecord::new("abc", 1200);
        let now = Utc::now();
        assert_eq!(record.deadline_from(now) - now, chrono::Duration::seconds(1200));
    }

    #[test]
    fn test_stored_record_json_layout() {
        let stored = StoredRecord {
            id: "abc".into(),
            expired: Utc::now(),
            payload: b"{}".to_vec(),
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["payload"], "e30=");
        let back: StoredRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let stored = StoredRecord {
            id: "abc".into(),
            expired: now,
            payload: Vec::new(),
        };
        assert!(stored.is_expired_at(now));
        assert!(!stored.is_expired_at(now - chrono::Duration::seconds(1)));
    }
}

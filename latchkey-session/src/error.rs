//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Transport failure reported by a datastore implementation
    #[error("Datastore error: {0}")]
    Datastore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// No record exists for a bound session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A replace reported errors for this session id
    #[error("Session ID ({0}) conflicts with an existing session")]
    Conflict(String),

    /// Delete of a key that is not in the session
    #[error("Key not found in session: {0}")]
    KeyNotFound(String),

    /// Every generated candidate id already existed
    #[error("Could not allocate a unique session ID after {attempts} attempts")]
    IdAllocationExhausted {
        /// Number of candidates tried
        attempts: usize,
    },

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// A session timeout argument that is not a positive number of seconds
    #[error("Invalid session timeout: {0} seconds (must be positive)")]
    InvalidTimeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,
}

impl SessionError {
    /// Check if this error is worth retrying at a higher level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::IdAllocationExhausted { .. }
        )
    }

    /// Check if this error came from the datastore transport rather than
    /// from session semantics.
    pub fn is_transport(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            Self::Datastore(_) | Self::Connection(_) | Self::Timeout => true,
            _ => false,
        }
    }
}

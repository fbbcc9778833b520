//! Server-side sessions with signed cookie tokens.
//!
//! A session is a small key-value payload stored in a shared datastore and
//! identified by a random id. The client only ever holds the id, signed with
//! HMAC-SHA256, in a cookie.
//!
//! Every access round-trips to the datastore: nothing is cached between
//! requests, and each read or write rewrites the record with a fresh expiry
//! deadline. Active sessions therefore never expire, idle ones disappear
//! after the configured timeout.
//!
//! # Features
//!
//! - `redis` - Redis datastore (enabled by default)
//!
//! # Examples
//!
//! ```
//! use latchkey_session::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::new("s3cret").with_timeout(3600);
//!     let factory = SessionFactory::new(config, Arc::new(MemoryDatastore::new()))?;
//!
//!     // Resolve the session for an incoming request
//!     let mut request = factory.open(None).await?;
//!
//!     // Store data; every write goes straight to the datastore
//!     let session = request.session();
//!     session.insert("user_id", 123).await?;
//!     session.insert("username", "alice").await?;
//!
//!     let user_id: Option<i32> = session.get_as("user_id").await?;
//!     assert_eq!(user_id, Some(123));
//!
//!     // At response time decide what to do with the cookie
//!     if let Some(header) = request.set_cookie_header(false) {
//!         println!("Set-Cookie: {}", header);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Redis Datastore (Default)
//!
//! ```no_run
//! use latchkey_session::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::from_env()?;
//!     let datastore = RedisDatastore::connect(&config.datastore).await?;
//!     let factory = SessionFactory::new(config, Arc::new(datastore))?;
//!
//!     let mut request = factory.open(Some("session=abc.def")).await?;
//!     request.session().invalidate().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod cookie;
pub mod datastore;
pub mod error;
pub mod factory;
pub mod id;
pub mod memory_store;
pub mod record;
pub mod session;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use codec::CookieCodec;
pub use config::{CookieOptions, DatastoreConfig, SameSite, SessionConfig};
pub use cookie::{CookieAction, cookie_value};
pub use datastore::Datastore;
pub use error::{SessionError, SessionResult};
pub use factory::{RequestSession, SessionFactory, SessionFactoryBuilder};
pub use id::{IdGenerator, PrefixedIdGenerator, RandomIdGenerator, generate_session_id};
pub use memory_store::MemoryDatastore;
pub use record::{
    JsonSerializer, ManagedDict, PayloadSerializer, SessionPayload, SessionRecord, StoredRecord,
};
pub use session::SessionState;
pub use store::{SessionStore, SyncMode};

#[cfg(feature = "redis")]
pub use redis_store::RedisDatastore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CookieOptions, DatastoreConfig, SameSite, SessionConfig};
    pub use crate::cookie::CookieAction;
    pub use crate::datastore::Datastore;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::factory::{RequestSession, SessionFactory};
    pub use crate::memory_store::MemoryDatastore;
    pub use crate::session::SessionState;
    pub use crate::store::SessionStore;

    #[cfg(feature = "redis")]
    pub use crate::redis_store::RedisDatastore;
}

//! Per-request session resolution and cookie finalization.

use crate::codec::CookieCodec;
use crate::config::{CookieOptions, SessionConfig};
use crate::cookie::{CookieAction, cookie_value};
use crate::datastore::Datastore;
use crate::error::{SessionError, SessionResult};
use crate::id::{IdGenerator, PrefixedIdGenerator};
use crate::record::PayloadSerializer;
use crate::session::SessionState;
use crate::store::SessionStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates one [`RequestSession`] per request.
///
/// Build it once at startup with the shared datastore client.
///
/// # Examples
///
/// ```
/// use latchkey_session::{MemoryDatastore, SessionConfig, SessionFactory};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), latchkey_session::SessionError> {
///     let factory = SessionFactory::new(
///         SessionConfig::new("s3cret"),
///         Arc::new(MemoryDatastore::new()),
///     )?;
///
///     // first request: no cookie yet
///     let mut request = factory.open(None).await?;
///     request.session().insert("user_id", 42).await?;
///     let set_cookie = request.set_cookie_header(false).expect("new session sets a cookie");
///
///     // next request presents the cookie
///     let token = set_cookie.split(';').next().unwrap();
///     let mut request = factory.open(Some(token)).await?;
///     assert_eq!(request.session().get_as::<i32>("user_id").await?, Some(42));
///     assert!(request.set_cookie_header(false).is_none());
///     Ok(())
/// }
/// ```
pub struct SessionFactory {
    config: Arc<SessionConfig>,
    store: Arc<SessionStore>,
    codec: CookieCodec,
}

impl SessionFactory {
    /// Create a factory with the default serializer and id generator.
    pub fn new(config: SessionConfig, datastore: Arc<dyn Datastore>) -> SessionResult<Self> {
        Self::builder(config, datastore).build()
    }

    /// Start building a factory with custom collaborators.
    pub fn builder(config: SessionConfig, datastore: Arc<dyn Datastore>) -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            config,
            datastore,
            serializer: None,
            id_generator: None,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The shared session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Resolve the session for a request from its `Cookie` header.
    ///
    /// A cookie that fails verification, or names a session the datastore
    /// no longer has, is treated as absent and a new session is allocated.
    /// Datastore failures fail the whole call.
    pub async fn open(&self, cookie_header: Option<&str>) -> SessionResult<RequestSession> {
        let from_cookie = cookie_header.and_then(|header| self.session_id_from_cookie(header));

        let existing = match from_cookie {
            Some(id) if self.store.exists(&id).await? => Some(id),
            Some(id) => {
                debug!(session_id = %id, "Cookie names an unknown session");
                None
            }
            None => None,
        };

        let cookie_was_valid = existing.is_some();
        let id = match existing {
            Some(id) => id,
            None => self.store.allocate_unique_id().await?,
        };

        debug!(session_id = %id, resumed = cookie_was_valid, "Opened session");

        Ok(RequestSession {
            session: SessionState::new(Arc::clone(&self.store), id, !cookie_was_valid),
            cookie_was_valid,
            config: Arc::clone(&self.config),
            codec: self.codec.clone(),
        })
    }

    fn session_id_from_cookie(&self, header: &str) -> Option<String> {
        let token = cookie_value(header, &self.config.cookie.name)?;
        let id = self.codec.verify(token);
        if id.is_none() {
            warn!(cookie = %self.config.cookie.name, "Rejected session cookie with bad signature");
        }
        id
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("cookie", &self.config.cookie)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionFactory`].
pub struct SessionFactoryBuilder {
    config: SessionConfig,
    datastore: Arc<dyn Datastore>,
    serializer: Option<Arc<dyn PayloadSerializer>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl SessionFactoryBuilder {
    /// Use a custom payload serializer.
    pub fn serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Use a custom id generator. Cannot be combined with an id prefix.
    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Validate the configuration and build the factory.
    pub fn build(self) -> SessionResult<SessionFactory> {
        self.config.validate()?;

        let id_generator = match (self.id_generator, &self.config.id_prefix) {
            (Some(_), Some(_)) => {
                return Err(SessionError::Config(
                    "cannot specify custom id_generator and a key prefix".to_string(),
                ));
            }
            (Some(generator), None) => Some(generator),
            (None, Some(prefix)) => {
                Some(Arc::new(PrefixedIdGenerator::new(prefix.as_str())) as Arc<dyn IdGenerator>)
            }
            (None, None) => None,
        };

        let mut store = SessionStore::new(self.datastore)
            .with_timeout(self.config.timeout)
            .with_max_id_attempts(self.config.max_id_attempts);

        if let Some(generator) = id_generator {
            store = store.with_id_generator(generator);
        }
        if let Some(serializer) = self.serializer {
            store = store.with_serializer(serializer);
        }
        if let Some(timeout) = self.config.operation_timeout {
            store = store.with_operation_timeout(timeout);
        }

        Ok(SessionFactory {
            codec: CookieCodec::new(&self.config.secret),
            config: Arc::new(self.config),
            store: Arc::new(store),
        })
    }
}

/// The session of one request together with what is needed to decide the
/// response cookie.
#[derive(Debug)]
pub struct RequestSession {
    session: SessionState,
    cookie_was_valid: bool,
    config: Arc<SessionConfig>,
    codec: CookieCodec,
}

impl RequestSession {
    /// The session handle.
    pub fn session(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Whether the request carried a valid cookie for a live session.
    pub fn cookie_was_valid(&self) -> bool {
        self.cookie_was_valid
    }

    /// Cookie attributes used when rendering headers.
    pub fn cookie_options(&self) -> &CookieOptions {
        &self.config.cookie
    }

    /// Decide what to do with the cookie once the response is ready.
    ///
    /// `exception_occurred` reports whether the request failed; with
    /// `cookie_on_exception` disabled, a failed request never receives a new
    /// session cookie.
    pub fn finalize(&self, exception_occurred: bool) -> CookieAction {
        if self.session.is_invalidated() {
            return if self.cookie_was_valid {
                CookieAction::Delete
            } else {
                CookieAction::Keep
            };
        }

        if !self.session.is_new() {
            return CookieAction::Keep;
        }

        if self.config.cookie_on_exception || !exception_occurred {
            return match self.session.current_id() {
                Some(id) => CookieAction::Set(self.codec.sign(id)),
                None => CookieAction::Keep,
            };
        }

        // the prior session was replaced but the new one is withheld
        if self.cookie_was_valid {
            CookieAction::Delete
        } else {
            CookieAction::Keep
        }
    }

    /// The `Set-Cookie` header value to send, if any.
    pub fn set_cookie_header(&self, exception_occurred: bool) -> Option<String> {
        self.finalize(exception_occurred)
            .header_value(&self.config.cookie)
    }

    /// Give up the cookie context and keep only the session handle.
    pub fn into_session(self) -> SessionState {
        self.session
    }
}

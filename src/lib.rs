// Latchkey - server-side sessions for Rust services
//
// This library re-exports the session core: signed cookie tokens, datastore
// backed session records and the per-request session factory.

// Re-export the session crate
pub use latchkey_session::*;

/// Prelude for common imports.
///
/// ```
/// use latchkey::prelude::*;
/// ```
pub mod prelude {
    pub use latchkey_session::prelude::*;
    pub use latchkey_session::{CookieCodec, IdGenerator, PayloadSerializer};
}

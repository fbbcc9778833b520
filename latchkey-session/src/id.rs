//! Session identifier generation.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes fed into each identifier.
const ENTROPY_BYTES: usize = 20;

/// Produces candidate session identifiers.
///
/// Implementations must draw from a cryptographically strong source and
/// return fixed-length strings usable as datastore keys. Candidates are not
/// required to be unique; uniqueness is enforced by the datastore's
/// insert-if-absent primitive during allocation.
pub trait IdGenerator: Send + Sync {
    /// Generate a candidate identifier.
    fn generate(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Default generator: a 64 character hex string derived from OS-seeded
/// random bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        generate_session_id()
    }
}

/// Generator that prepends a fixed namespace to every random id, for
/// visually separating keys of different applications in a shared store.
#[derive(Debug, Clone)]
pub struct PrefixedIdGenerator {
    prefix: String,
}

impl PrefixedIdGenerator {
    /// Create a generator with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for PrefixedIdGenerator {
    fn default() -> Self {
        Self::new("session:")
    }
}

impl IdGenerator for PrefixedIdGenerator {
    fn generate(&self) -> String {
        format!("{}{}", self.prefix, generate_session_id())
    }
}

/// Generate a new random session ID.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(Sha256::digest(Sha256::digest(bytes)))
}

/// Generate `len` random bytes, hex encoded.
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_session_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_ids_differ() {
        let ids: HashSet<String> = (0..256).map(|_| RandomIdGenerator.generate()).collect();
        assert_eq!(ids.len(), 256);
    }

    #[test]
    fn test_prefixed_generator() {
        let generator = PrefixedIdGenerator::new("app:");
        let id = generator.generate();
        assert!(id.starts_with("app:"));
        assert_eq!(id.len(), "app:".len() + 64);
    }

    #[test]
    fn test_closure_generator() {
        let generator = || "fixed".to_string();
        assert_eq!(IdGenerator::generate(&generator), "fixed");
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(20).len(), 40);
    }
}

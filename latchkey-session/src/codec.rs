//! Signed cookie tokens.
//!
//! A token is `<base64url(id)>.<base64url(hmac_sha256(secret, id))>`. Only
//! the holder of the secret can mint a token for a given id, and any change
//! to either half invalidates it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs session ids into cookie tokens and verifies them.
#[derive(Clone)]
pub struct CookieCodec {
    secret: Vec<u8>,
}

impl CookieCodec {
    /// Create a codec bound to a signing secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Produce a tamper-evident token for `id`.
    pub fn sign(&self, id: &str) -> String {
        let signature = self.mac(id.as_bytes()).finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(id.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Recover the id from `token`, or `None` if the token is malformed or
    /// its signature does not match.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (encoded_id, encoded_signature) = token.trim().split_once('.')?;
        let id = URL_SAFE_NO_PAD.decode(encoded_id).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(encoded_signature).ok()?;

        // constant-time comparison
        self.mac(&id).verify_slice(&signature).ok()?;

        String::from_utf8(id).ok().filter(|id| !id.is_empty())
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac
    }
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec").finish_non_exhaustive()
    }
}

/// Sign `id` with `secret`.
pub fn sign(id: &str, secret: impl AsRef<[u8]>) -> String {
    CookieCodec::new(secret).sign(id)
}

/// Verify `token` against `secret`, returning the embedded id.
pub fn verify(token: &str, secret: impl AsRef<[u8]>) -> Option<String> {
    CookieCodec::new(secret).verify(token)
}

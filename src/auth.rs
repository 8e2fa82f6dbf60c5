//! Request authorization tokens
//!
//! Every request carries a fresh token in the `authorization` header:
//! an HMAC-SHA256 over `mailbox:nonce:nonce_count:password:timestamp`
//! keyed with the shared key, presented as
//! `NHSMESH mailbox:nonce:nonce_count:timestamp:digest`.

use crate::error::{MeshboxError, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const AUTH_SCHEME: &str = "NHSMESH";

/// Generates per-request authorization tokens for one mailbox.
///
/// The nonce is fixed for the generator's lifetime; the counter
/// increments on every token, so concurrent requests never reuse a
/// `(nonce, count)` pair.
pub struct AuthTokenGenerator {
    mailbox_id: String,
    password: String,
    mac: HmacSha256,
    nonce: Uuid,
    nonce_count: AtomicU64,
}

impl AuthTokenGenerator {
    pub fn new(
        shared_key: &str,
        mailbox_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(shared_key.as_bytes())
            .map_err(|e| MeshboxError::Config(format!("invalid shared key: {e}")))?;
        Ok(Self {
            mailbox_id: mailbox_id.into(),
            password: password.into(),
            mac,
            nonce: Uuid::new_v4(),
            nonce_count: AtomicU64::new(0),
        })
    }

    /// Produce the next authorization header value.
    pub fn token(&self) -> String {
        let timestamp = Utc::now().format("%Y%m%d%H%M").to_string();
        let count = self.nonce_count.fetch_add(1, Ordering::Relaxed);

        let public = format!("{}:{}:{}:{}", self.mailbox_id, self.nonce, count, timestamp);
        let private = format!(
            "{}:{}:{}:{}:{}",
            self.mailbox_id, self.nonce, count, self.password, timestamp
        );

        let mut mac = self.mac.clone();
        mac.update(private.as_bytes());
        let digest = mac.finalize().into_bytes();
        let digest_hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        format!("{AUTH_SCHEME} {public}:{digest_hex}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_shape() {
        let generator = AuthTokenGenerator::new("shared", "X26ABC1", "password").unwrap();
        let token = generator.token();

        let value = token.strip_prefix("NHSMESH ").expect("scheme prefix");
        let parts: Vec<&str> = value.split(':').collect();
        // mailbox : nonce : count : timestamp : digest
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "X26ABC1");
        assert_eq!(parts[2], "0");
        assert_eq!(parts[3].len(), 12); // YYYYMMDDHHMM
        assert_eq!(parts[4].len(), 64); // hex sha256
        assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nonce_count_increments_per_token() {
        let generator = AuthTokenGenerator::new("shared", "X26ABC1", "password").unwrap();
        let first = generator.token();
        let second = generator.token();

        assert_ne!(first, second);
        assert!(first.contains(":0:"));
        assert!(second.contains(":1:"));
    }
}

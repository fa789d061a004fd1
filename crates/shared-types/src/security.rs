//! # Relay Authentication
//!
//! Challenge/response proof of possession of the shared relay credential.
//!
//! The primary sends a random `CHALLENGE_LEN`-byte challenge; the relay
//! answers with `HMAC-SHA256(credential, challenge || relay_id || region)`.
//! The credential itself never crosses the wire.

use crate::entities::{Region, RelayId};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of an authentication challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Shared secret held by the primary and every relay.
#[derive(Clone)]
pub struct RelayCredential {
    secret: Vec<u8>,
}

impl RelayCredential {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    /// Fresh random challenge.
    pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);
        challenge
    }

    /// Compute the response a relay sends for `challenge`.
    pub fn sign(&self, challenge: &[u8], relay_id: &RelayId, region: &Region) -> Vec<u8> {
        match self.mac(challenge, relay_id, region) {
            Some(mac) => mac.finalize().into_bytes().to_vec(),
            None => Vec::new(),
        }
    }

    /// Verify a relay's response.
    ///
    /// # Security
    ///
    /// Uses constant-time comparison.
    pub fn verify(
        &self,
        challenge: &[u8],
        relay_id: &RelayId,
        region: &Region,
        response: &[u8],
    ) -> bool {
        match self.mac(challenge, relay_id, region) {
            Some(mac) => mac.verify_slice(response).is_ok(),
            None => false,
        }
    }

    fn mac(&self, challenge: &[u8], relay_id: &RelayId, region: &Region) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(challenge);
        // Length prefixes keep (relay_id, region) pairs from aliasing.
        mac.update(&(relay_id.as_str().len() as u32).to_be_bytes());
        mac.update(relay_id.as_str().as_bytes());
        mac.update(&(region.as_str().len() as u32).to_be_bytes());
        mac.update(region.as_str().as_bytes());
        Some(mac)
    }
}

impl fmt::Debug for RelayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredential")
            .field("secret", &"<redacted>")
            .finish()
    }
}

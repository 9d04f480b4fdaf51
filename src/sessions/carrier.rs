//! Sealed session carriers
//!
//! A carrier is what the client holds between ceremony steps: the session
//! token and expiry, encrypted and authenticated with the service session key.
//! Layout: base64url(nonce || ChaCha20-Poly1305(JSON claims)), with the
//! session purpose as associated data.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::payload::SessionPurpose;
use crate::types::{generate_random_bytes, CaError, Result};

pub const NONCE_LEN: usize = 12;
pub const AUTH_TAG_LEN: usize = 16;
pub const SESSION_KEY_LEN: usize = 32;

const CARRIER_VERSION: u8 = 1;

/// Symmetric key sealing session carriers
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        Self(generate_random_bytes::<SESSION_KEY_LEN>())
    }

    /// Parse 64 hex characters
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CaError::Config(format!("Session key is not hex: {e}")))?;
        let key: [u8; SESSION_KEY_LEN] = bytes.try_into().map_err(|_| {
            CaError::Config(format!(
                "Session key must be {} hex characters",
                SESSION_KEY_LEN * 2
            ))
        })?;
        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Contents of a carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierClaims {
    pub version: u8,
    pub purpose: SessionPurpose,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CarrierClaims {
    pub fn new(purpose: SessionPurpose, token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            version: CARRIER_VERSION,
            purpose,
            token,
            expires_at,
        }
    }
}

pub fn seal(key: &SessionKey, claims: &CarrierClaims) -> Result<String> {
    let plaintext = serde_json::to_vec(claims)?;
    let nonce_bytes = generate_random_bytes::<NONCE_LEN>();

    let ciphertext = key
        .cipher()
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad: claims.purpose.as_str().as_bytes(),
            },
        )
        .map_err(|_| CaError::Internal("Session carrier encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Open a carrier expected to be for `purpose`.
///
/// `None` when the carrier is not valid base64url, was sealed with another key
/// or purpose, was modified, or carries an unknown version.
pub fn open(key: &SessionKey, purpose: SessionPurpose, carrier: &str) -> Option<CarrierClaims> {
    let sealed = URL_SAFE_NO_PAD.decode(carrier.trim()).ok()?;
    if sealed.len() < NONCE_LEN + AUTH_TAG_LEN {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let plaintext = key
        .cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: purpose.as_str().as_bytes(),
            },
        )
        .ok()?;

    let claims: CarrierClaims = serde_json::from_slice(&plaintext).ok()?;
    (claims.version == CARRIER_VERSION && claims.purpose == purpose).then_some(claims)
}

//! Shared identifiers and helpers

mod error;

pub use error::{CaError, Result};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal, stable account key.
///
/// Never appears inside certificates; the ledger uses [`ExternalAccountId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable 16-byte encoding handed to the ceremony layer as the user handle
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|_| CaError::MalformedInput("account handle must be 16 bytes".into()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CaError::Database(format!("Invalid stored account id {s}: {e}")))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Account identifier asserted by a certificate's subject common name.
///
/// This is the key of the account claim ledger. It is a free-form string
/// chosen by the relying party, unrelated to [`AccountId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalAccountId(String);

impl ExternalAccountId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CaError::BadRequest("account identifier is empty".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque 128-bit vault lock token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub Uuid);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::from_bytes(generate_random_bytes::<16>()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CaError::MalformedInput("invalid lock token".into()))
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// Opaque, monotonically increasing vault version ("etag")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionTag(u64);

impl VersionTag {
    pub fn from_version(version: u64) -> Self {
        Self(version)
    }

    pub fn version(&self) -> u64 {
        self.0
    }

    /// Quoted form, as carried in an `ETag` header
    pub fn to_etag(&self) -> String {
        format!("\"v{:016x}\"", self.0)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_etag())
    }
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Absolute expiry for a TTL starting now; `Config` if it is out of range
pub fn expiry_after(ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| CaError::Config(format!("TTL of {}s is out of range", ttl.as_secs())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_bytes_roundtrip() {
        let id = AccountId::new();
        let bytes = id.to_bytes();
        assert_eq!(AccountId::from_bytes(&bytes).unwrap(), id);
        assert!(AccountId::from_bytes(&bytes[..8]).is_err());
    }

    #[test]
    fn test_external_account_id_rejects_blank() {
        assert!(ExternalAccountId::new("  ").is_err());
        assert_eq!(ExternalAccountId::new("A1").unwrap().as_str(), "A1");
    }

    #[test]
    fn test_lock_tokens_are_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_ne!(a, b);
        assert_eq!(LockToken::parse(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn test_version_tag_ordering() {
        let v1 = VersionTag::from_version(1);
        let v2 = VersionTag::from_version(2);
        assert!(v2 > v1);
        assert_eq!(v1.to_etag(), "\"v0000000000000001\"");
    }

    #[test]
    fn test_expiry_after_is_in_future() {
        let expires = expiry_after(Duration::from_secs(30)).unwrap();
        let delta = expires - Utc::now();
        assert!(delta.num_seconds() >= 29 && delta.num_seconds() <= 30);
    }

    #[test]
    fn test_expiry_after_huge_ttl_is_config_error() {
        let err = expiry_after(Duration::from_secs(u64::MAX)).unwrap_err();
        assert!(matches!(err, CaError::Config(_)));

        let err = expiry_after(Duration::from_secs(i64::MAX as u64 / 1000)).unwrap_err();
        assert!(matches!(err, CaError::Config(_)));
    }
}

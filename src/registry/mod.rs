//! Authenticator key registry
//!
//! Public keys proven, by a completed registration ceremony, to belong to an
//! account. Keys are stored in the canonical PEM form produced by
//! [`canonical_public_key_pem`], so authorization is an exact text match.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::certs::canonical_public_key_pem;
use crate::logging::{AuditEvent, AuditKind, AuditLog};
use crate::store::KeyStore;
use crate::types::{AccountId, CaError, Result};

/// A public key authorized to request certificates for an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorKey {
    pub account_id: AccountId,
    /// Canonical `PUBLIC KEY` PEM
    pub key_pem: String,
    pub created_at: DateTime<Utc>,
}

/// Registry of authenticator keys per account
#[derive(Clone)]
pub struct AuthenticatorKeyRegistry {
    store: Arc<dyn KeyStore>,
    audit: AuditLog,
}

impl AuthenticatorKeyRegistry {
    pub fn new(store: Arc<dyn KeyStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Register a key for an account. Registering the same key twice is a
    /// no-op success.
    ///
    /// Accepts a PEM or DER public key, or the base64 encoding of either
    /// (the form a registration client sends). Returns the stored PEM.
    pub async fn register_key(&self, account: AccountId, key: &[u8]) -> Result<String> {
        let key_pem = normalize_key_input(key)?;

        let inserted = self
            .store
            .insert_key(&AuthenticatorKey {
                account_id: account,
                key_pem: key_pem.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if inserted {
            let fingerprint = key_fingerprint(&key_pem);
            info!(account_id = %account, fingerprint = %fingerprint, "Authenticator key registered");
            self.audit
                .log(
                    AuditEvent::new(AuditKind::KeyRegistered)
                        .with_account_id(account)
                        .with_subject(fingerprint),
                )
                .await;
        } else {
            debug!(account_id = %account, "Authenticator key already registered");
        }

        Ok(key_pem)
    }

    /// Exact match of a canonical PEM against the account's keys
    pub async fn is_authorized(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        self.store.contains_key(account, key_pem).await
    }

    pub async fn revoke_key(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        let removed = self.store.remove_key(account, key_pem).await?;
        if removed {
            let fingerprint = key_fingerprint(key_pem);
            info!(account_id = %account, fingerprint = %fingerprint, "Authenticator key revoked");
            self.audit
                .log(
                    AuditEvent::new(AuditKind::KeyRevoked)
                        .with_account_id(account)
                        .with_subject(fingerprint),
                )
                .await;
        }
        Ok(removed)
    }

    pub async fn keys_for(&self, account: AccountId) -> Result<Vec<AuthenticatorKey>> {
        self.store.list_keys(account).await
    }
}

/// Short SHA-256 fingerprint of a canonical key PEM, for logs and audit
pub fn key_fingerprint(key_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_pem.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Canonical PEM for a key given as PEM, DER, or base64 of either
pub fn normalize_key_input(key: &[u8]) -> Result<String> {
    if let Ok(pem) = canonical_public_key_pem(key) {
        return Ok(pem);
    }

    let text = std::str::from_utf8(key)
        .map_err(|_| CaError::MalformedInput("public key is not PEM, DER or base64".into()))?;
    let decoded = STANDARD
        .decode(text.trim())
        .map_err(|_| CaError::MalformedInput("public key is not PEM, DER or base64".into()))?;

    canonical_public_key_pem(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rcgen::KeyPair;

    fn registry() -> AuthenticatorKeyRegistry {
        AuthenticatorKeyRegistry::new(Arc::new(MemoryStore::new()), AuditLog::disabled())
    }

    fn public_pem() -> String {
        let key = KeyPair::generate().unwrap();
        crate::certs::codec::public_key_pem(&key.public_key_der())
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = registry();
        let account = AccountId::new();
        let pem = public_pem();

        registry.register_key(account, pem.as_bytes()).await.unwrap();
        registry.register_key(account, pem.as_bytes()).await.unwrap();

        assert_eq!(registry.keys_for(account).await.unwrap().len(), 1);
        assert!(registry.is_authorized(account, &pem).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_per_account() {
        let registry = registry();
        let alice = AccountId::new();
        let bob = AccountId::new();
        let pem = public_pem();

        registry.register_key(alice, pem.as_bytes()).await.unwrap();
        assert!(!registry.is_authorized(bob, &pem).await.unwrap());
    }

    #[tokio::test]
    async fn test_base64_wrapped_pem_is_normalized() {
        let registry = registry();
        let account = AccountId::new();
        let pem = public_pem();
        let wrapped = STANDARD.encode(pem.replace('\n', "\r\n"));

        let stored = registry
            .register_key(account, wrapped.as_bytes())
            .await
            .unwrap();
        assert_eq!(stored, pem);
        assert!(registry.is_authorized(account, &pem).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_removes_authorization() {
        let registry = registry();
        let account = AccountId::new();
        let pem = public_pem();

        registry.register_key(account, pem.as_bytes()).await.unwrap();
        assert!(registry.revoke_key(account, &pem).await.unwrap());
        assert!(!registry.revoke_key(account, &pem).await.unwrap());
        assert!(!registry.is_authorized(account, &pem).await.unwrap());
    }

    #[test]
    fn test_fingerprint_is_stable_per_key() {
        let pem = public_pem();
        assert_eq!(key_fingerprint(&pem), key_fingerprint(&pem));
        assert_eq!(key_fingerprint(&pem).len(), 16);
        assert_ne!(key_fingerprint(&pem), key_fingerprint(&public_pem()));
    }

    #[tokio::test]
    async fn test_garbage_key_is_malformed() {
        let registry = registry();
        let err = registry
            .register_key(AccountId::new(), b"hello world")
            .await
            .unwrap_err();
        assert!(matches!(err, CaError::MalformedInput(_)));
    }
}

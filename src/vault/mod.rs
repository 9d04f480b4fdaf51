//! Recovery vault lock manager
//!
//! One vault per account, holding an opaque encrypted blob and a version
//! number. Writers must hold the account's advisory lock:
//!
//! ```text
//! Free --acquire--> Held(token, expiry) --release(token)--> Free
//!                          |
//!                          +--expiry passes--> Free (lazily, or by sweep)
//! ```
//!
//! A lock is identified by its random token. Releasing or expiring compares
//! the token, so a stale holder can never free a lock taken after theirs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::logging::{AuditEvent, AuditKind, AuditLog};
use crate::store::VaultStore;
use crate::types::{expiry_after, AccountId, CaError, LockToken, Result, VersionTag};

/// How long an acquired lock stays valid
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLock {
    pub token: LockToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VaultLock {
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub account_id: AccountId,
    pub data: Vec<u8>,
    pub version: u64,
    pub lock: Option<VaultLock>,
}

#[derive(Clone)]
pub struct VaultLockManager {
    store: Arc<dyn VaultStore>,
    ttl: Duration,
    audit: AuditLog,
}

impl VaultLockManager {
    pub fn new(store: Arc<dyn VaultStore>, ttl: Duration, audit: AuditLog) -> Self {
        Self { store, ttl, audit }
    }

    /// Take the account's vault lock; `Conflict` while someone else holds it.
    pub async fn acquire_lock(&self, account: AccountId) -> Result<LockToken> {
        let now = Utc::now();
        let lock = VaultLock {
            token: LockToken::generate(),
            acquired_at: now,
            expires_at: expiry_after(self.ttl)?,
        };

        if !self.store.try_lock(account, &lock, now).await? {
            debug!(account_id = %account, "Vault lock busy");
            return Err(CaError::Conflict("vault is locked".into()));
        }

        info!(account_id = %account, expires_at = %lock.expires_at, "Vault lock acquired");
        self.audit
            .log(AuditEvent::new(AuditKind::LockAcquired).with_account_id(account))
            .await;
        Ok(lock.token)
    }

    /// Release the lock if `token` still holds it. Returns whether it did.
    pub async fn release_lock(&self, account: AccountId, token: LockToken) -> Result<bool> {
        let released = self.store.unlock(account, token).await?;
        if released {
            info!(account_id = %account, "Vault lock released");
            self.audit
                .log(AuditEvent::new(AuditKind::LockReleased).with_account_id(account))
                .await;
        } else {
            debug!(account_id = %account, "Stale vault lock release ignored");
        }
        Ok(released)
    }

    /// Replace the vault contents under a held lock and return the new version.
    pub async fn write_vault(
        &self,
        account: AccountId,
        token: LockToken,
        data: &[u8],
    ) -> Result<VersionTag> {
        let version = self
            .store
            .write_locked(account, token, data, Utc::now())
            .await?
            .ok_or_else(|| CaError::Conflict("vault lock not held".into()))?;

        let tag = VersionTag::from_version(version);
        info!(account_id = %account, version, bytes = data.len(), "Vault written");
        self.audit
            .log(
                AuditEvent::new(AuditKind::VaultWritten)
                    .with_account_id(account)
                    .with_subject(version),
            )
            .await;
        Ok(tag)
    }

    /// Current contents and version; `None` if never written
    pub async fn read_vault(&self, account: AccountId) -> Result<Option<(Vec<u8>, VersionTag)>> {
        Ok(self
            .store
            .read_vault(account)
            .await?
            .filter(|record| record.version > 0)
            .map(|record| (record.data, VersionTag::from_version(record.version))))
    }

    /// Clear every lock that has expired. Returns how many were cleared.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut cleared = 0;

        for (account, token) in self.store.expired_locks(now).await? {
            if self.store.expire_lock(account, token, now).await? {
                cleared += 1;
                debug!(account_id = %account, "Expired vault lock cleared");
                self.audit
                    .log(AuditEvent::new(AuditKind::LockExpired).with_account_id(account))
                    .await;
            }
        }

        Ok(cleared)
    }
}

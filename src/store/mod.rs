//! Storage seam
//!
//! Components talk to persistence through these traits only. Every operation
//! that must be atomic per key (username uniqueness, claim insertion, session
//! take, lock transitions) is a single trait call so that each backend can map
//! it onto one storage primitive:
//!
//! | Operation | `MemoryStore` | `MongoStore` |
//! |---|---|---|
//! | claim / account / key insert | `DashMap` entry lock | unique index |
//! | session take | `DashMap::remove` | `find_one_and_delete` |
//! | lock acquire | entry lock | conditional upsert |
//! | locked write | entry lock | `find_one_and_update` |

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::accounts::{Account, CredentialRecord};
use crate::claims::{AccountClaim, ClaimOutcome, ClaimSource};
use crate::issuance::IssuedCertificate;
use crate::registry::AuthenticatorKey;
use crate::sessions::{SessionEntry, SessionPurpose};
use crate::types::{AccountId, ExternalAccountId, LockToken, Result};
use crate::vault::{VaultLock, VaultRecord};

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account; `Conflict` if the username is taken
    async fn insert_account(&self, account: &Account) -> Result<()>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Append a credential record; false if the account does not exist
    async fn push_credential(&self, id: AccountId, record: &CredentialRecord) -> Result<bool>;

    /// Update counter state of one credential; false if no such credential
    async fn update_credential_counter(
        &self,
        id: AccountId,
        credential_id: &[u8],
        sign_count: u32,
        clone_warning: bool,
    ) -> Result<bool>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert unless the same (account, PEM) pair exists; true when inserted
    async fn insert_key(&self, key: &AuthenticatorKey) -> Result<bool>;

    async fn contains_key(&self, account: AccountId, key_pem: &str) -> Result<bool>;

    async fn remove_key(&self, account: AccountId, key_pem: &str) -> Result<bool>;

    async fn list_keys(&self, account: AccountId) -> Result<Vec<AuthenticatorKey>>;
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn insert_certificate(&self, certificate: &IssuedCertificate) -> Result<()>;

    /// All certificates of an account, oldest first
    async fn list_certificates(&self, account: AccountId) -> Result<Vec<IssuedCertificate>>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Record the claim unless its (source, identifier) pair is already
    /// claimed, reporting which of the three outcomes happened. Must be
    /// atomic per pair.
    async fn insert_claim_if_absent(&self, claim: &AccountClaim) -> Result<ClaimOutcome>;

    async fn find_claim(
        &self,
        source: ClaimSource,
        account: &ExternalAccountId,
    ) -> Result<Option<AccountClaim>>;
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn put_session(&self, entry: &SessionEntry) -> Result<()>;

    /// Remove the entry and return it if it was still valid at `now`.
    /// Two concurrent takes of the same key never both return `Some`.
    async fn take_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>>;

    /// Read without consuming
    async fn peek_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>>;

    async fn delete_session(&self, purpose: SessionPurpose, token: &str) -> Result<bool>;

    /// Drop every entry expired at `now`, returning how many went
    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Install `lock` unless an unexpired lock is held at `now`.
    /// Returns false when the lock is held by someone else.
    async fn try_lock(&self, account: AccountId, lock: &VaultLock, now: DateTime<Utc>)
        -> Result<bool>;

    /// Clear the lock only if `token` is the current one
    async fn unlock(&self, account: AccountId, token: LockToken) -> Result<bool>;

    /// Clear the lock only if `token` is current and expired at `now`
    async fn expire_lock(
        &self,
        account: AccountId,
        token: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Replace the vault data and bump the version if `token` holds an
    /// unexpired lock. Returns the new version, or `None` when it does not.
    async fn write_locked(
        &self,
        account: AccountId,
        token: LockToken,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<u64>>;

    async fn read_vault(&self, account: AccountId) -> Result<Option<VaultRecord>>;

    /// Locks whose expiry is at or before `now`
    async fn expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<(AccountId, LockToken)>>;
}

/// Everything a full backend provides
pub trait Store:
    AccountStore + KeyStore + CertificateStore + ClaimStore + SessionBackend + VaultStore
{
}

impl<T> Store for T where
    T: AccountStore + KeyStore + CertificateStore + ClaimStore + SessionBackend + VaultStore
{
}

//! In-memory backend
//!
//! Used in development mode and tests. Per-key atomicity comes from `DashMap`
//! entry locking: every check-and-write below happens while the entry's shard
//! lock is held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{AccountStore, CertificateStore, ClaimStore, KeyStore, SessionBackend, VaultStore};
use crate::accounts::{Account, CredentialRecord};
use crate::claims::{AccountClaim, ClaimOutcome, ClaimSource};
use crate::issuance::IssuedCertificate;
use crate::registry::AuthenticatorKey;
use crate::sessions::{SessionEntry, SessionPurpose};
use crate::types::{AccountId, CaError, ExternalAccountId, LockToken, Result};
use crate::vault::{VaultLock, VaultRecord};

#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    usernames: DashMap<String, AccountId>,
    keys: DashMap<AccountId, Vec<AuthenticatorKey>>,
    certificates: DashMap<AccountId, Vec<IssuedCertificate>>,
    claims: DashMap<(ClaimSource, ExternalAccountId), AccountClaim>,
    sessions: DashMap<(SessionPurpose, String), SessionEntry>,
    vaults: DashMap<AccountId, VaultRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        match self.usernames.entry(account.username.clone()) {
            Entry::Occupied(_) => Err(CaError::Conflict("user already exists".into())),
            Entry::Vacant(slot) => {
                self.accounts.insert(account.id, account.clone());
                slot.insert(account.id);
                Ok(())
            }
        }
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let Some(id) = self.usernames.get(username).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn push_credential(&self, id: AccountId, record: &CredentialRecord) -> Result<bool> {
        match self.accounts.get_mut(&id) {
            Some(mut account) => {
                account.credentials.push(record.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_credential_counter(
        &self,
        id: AccountId,
        credential_id: &[u8],
        sign_count: u32,
        clone_warning: bool,
    ) -> Result<bool> {
        let Some(mut account) = self.accounts.get_mut(&id) else {
            return Ok(false);
        };
        match account
            .credentials
            .iter_mut()
            .find(|c| c.credential_id == credential_id)
        {
            Some(credential) => {
                credential.sign_count = sign_count;
                credential.clone_warning = clone_warning;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_key(&self, key: &AuthenticatorKey) -> Result<bool> {
        let mut keys = self.keys.entry(key.account_id).or_default();
        if keys.iter().any(|k| k.key_pem == key.key_pem) {
            return Ok(false);
        }
        keys.push(key.clone());
        Ok(true)
    }

    async fn contains_key(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        Ok(self
            .keys
            .get(&account)
            .is_some_and(|keys| keys.iter().any(|k| k.key_pem == key_pem)))
    }

    async fn remove_key(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        let Some(mut keys) = self.keys.get_mut(&account) else {
            return Ok(false);
        };
        let before = keys.len();
        keys.retain(|k| k.key_pem != key_pem);
        Ok(keys.len() != before)
    }

    async fn list_keys(&self, account: AccountId) -> Result<Vec<AuthenticatorKey>> {
        Ok(self
            .keys
            .get(&account)
            .map(|keys| keys.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn insert_certificate(&self, certificate: &IssuedCertificate) -> Result<()> {
        self.certificates
            .entry(certificate.account_id)
            .or_default()
            .push(certificate.clone());
        Ok(())
    }

    async fn list_certificates(&self, account: AccountId) -> Result<Vec<IssuedCertificate>> {
        Ok(self
            .certificates
            .get(&account)
            .map(|certs| certs.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn insert_claim_if_absent(&self, claim: &AccountClaim) -> Result<ClaimOutcome> {
        match self.claims.entry((claim.source, claim.account_id.clone())) {
            Entry::Occupied(existing) => Ok(ClaimOutcome::against(existing.get(), &claim.username)),
            Entry::Vacant(slot) => {
                slot.insert(claim.clone());
                Ok(ClaimOutcome::Inserted)
            }
        }
    }

    async fn find_claim(
        &self,
        source: ClaimSource,
        account: &ExternalAccountId,
    ) -> Result<Option<AccountClaim>> {
        Ok(self
            .claims
            .get(&(source, account.clone()))
            .map(|c| c.clone()))
    }
}

#[async_trait]
impl SessionBackend for MemoryStore {
    async fn put_session(&self, entry: &SessionEntry) -> Result<()> {
        self.sessions
            .insert((entry.purpose, entry.token.clone()), entry.clone());
        Ok(())
    }

    async fn take_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>> {
        Ok(self
            .sessions
            .remove(&(purpose, token.to_string()))
            .map(|(_, entry)| entry)
            .filter(|entry| entry.is_live(now)))
    }

    async fn peek_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>> {
        Ok(self
            .sessions
            .get(&(purpose, token.to_string()))
            .map(|entry| entry.clone())
            .filter(|entry| entry.is_live(now)))
    }

    async fn delete_session(&self, purpose: SessionPurpose, token: &str) -> Result<bool> {
        Ok(self.sessions.remove(&(purpose, token.to_string())).is_some())
    }

    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    async fn try_lock(
        &self,
        account: AccountId,
        lock: &VaultLock,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut record = self.vaults.entry(account).or_insert_with(|| VaultRecord {
            account_id: account,
            data: Vec::new(),
            version: 0,
            lock: None,
        });

        if record.lock.as_ref().is_some_and(|held| held.is_held_at(now)) {
            return Ok(false);
        }
        record.lock = Some(lock.clone());
        Ok(true)
    }

    async fn unlock(&self, account: AccountId, token: LockToken) -> Result<bool> {
        let Some(mut record) = self.vaults.get_mut(&account) else {
            return Ok(false);
        };
        if record.lock.as_ref().is_some_and(|held| held.token == token) {
            record.lock = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn expire_lock(
        &self,
        account: AccountId,
        token: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut record) = self.vaults.get_mut(&account) else {
            return Ok(false);
        };
        if record
            .lock
            .as_ref()
            .is_some_and(|held| held.token == token && !held.is_held_at(now))
        {
            record.lock = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn write_locked(
        &self,
        account: AccountId,
        token: LockToken,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let Some(mut record) = self.vaults.get_mut(&account) else {
            return Ok(None);
        };
        let holds = record
            .lock
            .as_ref()
            .is_some_and(|held| held.token == token && held.is_held_at(now));
        if !holds {
            return Ok(None);
        }

        record.data = data.to_vec();
        record.version += 1;
        Ok(Some(record.version))
    }

    async fn read_vault(&self, account: AccountId) -> Result<Option<VaultRecord>> {
        Ok(self.vaults.get(&account).map(|r| r.clone()))
    }

    async fn expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<(AccountId, LockToken)>> {
        Ok(self
            .vaults
            .iter()
            .filter_map(|record| {
                record
                    .lock
                    .as_ref()
                    .filter(|held| !held.is_held_at(now))
                    .map(|held| (record.account_id, held.token))
            })
            .collect())
    }
}

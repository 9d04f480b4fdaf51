//! MongoDB backend
//!
//! Every atomic operation is one server-side primitive: unique-index inserts
//! for accounts, keys and claims; `find_one_and_delete` for session takes;
//! a conditional upsert for lock acquisition; `find_one_and_update` for
//! token-checked vault writes.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bson::{doc, DateTime as BsonDateTime};
use chrono::{DateTime, Utc};
use mongodb::options::ReturnDocument;
use tracing::{debug, warn};

use super::{AccountStore, CertificateStore, ClaimStore, KeyStore, SessionBackend, VaultStore};
use crate::accounts::{Account, CredentialRecord};
use crate::claims::{AccountClaim, ClaimOutcome, ClaimSource};
use crate::db::schemas::{
    AccountClaimDoc, AccountDoc, AuthenticatorKeyDoc, CeremonySessionDoc, CertificateDoc,
    CredentialDoc, VaultDoc, VaultLockDoc, ACCOUNT_COLLECTION, AUTHENTICATOR_KEY_COLLECTION,
    CERTIFICATE_COLLECTION, CLAIM_COLLECTION, SESSION_COLLECTION, VAULT_COLLECTION,
};
use crate::db::{is_duplicate_key, MongoClient, MongoCollection};
use crate::issuance::IssuedCertificate;
use crate::registry::AuthenticatorKey;
use crate::sessions::{SessionEntry, SessionPurpose};
use crate::types::{AccountId, CaError, ExternalAccountId, LockToken, Result};
use crate::vault::{VaultLock, VaultRecord};

#[derive(Clone)]
pub struct MongoStore {
    accounts: MongoCollection<AccountDoc>,
    keys: MongoCollection<AuthenticatorKeyDoc>,
    certificates: MongoCollection<CertificateDoc>,
    claims: MongoCollection<AccountClaimDoc>,
    sessions: MongoCollection<CeremonySessionDoc>,
    vaults: MongoCollection<VaultDoc>,
}

impl MongoStore {
    /// Open every collection, creating indexes as needed
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            accounts: client.collection(ACCOUNT_COLLECTION).await?,
            keys: client.collection(AUTHENTICATOR_KEY_COLLECTION).await?,
            certificates: client.collection(CERTIFICATE_COLLECTION).await?,
            claims: client.collection(CLAIM_COLLECTION).await?,
            sessions: client.collection(SESSION_COLLECTION).await?,
            vaults: client.collection(VAULT_COLLECTION).await?,
        })
    }
}

fn bson_time(t: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(t)
}

fn driver_error(op: &str) -> impl Fn(mongodb::error::Error) -> CaError + '_ {
    move |e| CaError::Database(format!("{op} failed: {e}"))
}

#[async_trait]
impl AccountStore for MongoStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        match self.accounts.insert_one(AccountDoc::from(account)).await {
            Err(CaError::Conflict(_)) => Err(CaError::Conflict("user already exists".into())),
            other => other,
        }
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.accounts
            .find_one(doc! { "account_id": id.to_string() })
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.accounts
            .find_one(doc! { "username": username })
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn push_credential(&self, id: AccountId, record: &CredentialRecord) -> Result<bool> {
        let credential = bson::to_bson(&CredentialDoc::from(record))
            .map_err(|e| CaError::Internal(format!("BSON encode failed: {e}")))?;
        let result = self
            .accounts
            .update_one(
                doc! { "account_id": id.to_string() },
                doc! {
                    "$push": { "credentials": credential },
                    "$set": { "metadata.updated_at": BsonDateTime::now() },
                },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn update_credential_counter(
        &self,
        id: AccountId,
        credential_id: &[u8],
        sign_count: u32,
        clone_warning: bool,
    ) -> Result<bool> {
        let result = self
            .accounts
            .update_one(
                doc! {
                    "account_id": id.to_string(),
                    "credentials.credential_id": STANDARD.encode(credential_id),
                },
                doc! {
                    "$set": {
                        "credentials.$.sign_count": i64::from(sign_count),
                        "credentials.$.clone_warning": clone_warning,
                        "metadata.updated_at": BsonDateTime::now(),
                    }
                },
            )
            .await?;
        Ok(result.matched_count == 1)
    }
}

#[async_trait]
impl KeyStore for MongoStore {
    async fn insert_key(&self, key: &AuthenticatorKey) -> Result<bool> {
        match self.keys.insert_one(AuthenticatorKeyDoc::from(key)).await {
            Ok(()) => Ok(true),
            Err(CaError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn contains_key(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        Ok(self
            .keys
            .find_one(doc! { "account_id": account.to_string(), "key_pem": key_pem })
            .await?
            .is_some())
    }

    async fn remove_key(&self, account: AccountId, key_pem: &str) -> Result<bool> {
        let result = self
            .keys
            .delete_one(doc! { "account_id": account.to_string(), "key_pem": key_pem })
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn list_keys(&self, account: AccountId) -> Result<Vec<AuthenticatorKey>> {
        self.keys
            .find_many(doc! { "account_id": account.to_string() })
            .await?
            .into_iter()
            .map(AuthenticatorKey::try_from)
            .collect()
    }
}

#[async_trait]
impl CertificateStore for MongoStore {
    async fn insert_certificate(&self, certificate: &IssuedCertificate) -> Result<()> {
        self.certificates
            .insert_one(CertificateDoc::from(certificate))
            .await
    }

    async fn list_certificates(&self, account: AccountId) -> Result<Vec<IssuedCertificate>> {
        let mut certificates = self
            .certificates
            .find_many(doc! { "account_id": account.to_string() })
            .await?
            .into_iter()
            .map(IssuedCertificate::try_from)
            .collect::<Result<Vec<_>>>()?;
        certificates.sort_by_key(|c| c.issued_at);
        Ok(certificates)
    }
}

#[async_trait]
impl ClaimStore for MongoStore {
    async fn insert_claim_if_absent(&self, claim: &AccountClaim) -> Result<ClaimOutcome> {
        match self.claims.insert_one(AccountClaimDoc::from(claim)).await {
            Ok(()) => return Ok(ClaimOutcome::Inserted),
            Err(CaError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        // The unique index refused the insert: classify against the winner.
        // Claims are never deleted, so the winner is always there to read.
        let existing = self
            .find_claim(claim.source, &claim.account_id)
            .await?
            .ok_or_else(|| {
                CaError::Database(format!(
                    "Claim for {} ({}) vanished",
                    claim.account_id, claim.source
                ))
            })?;
        Ok(ClaimOutcome::against(&existing, &claim.username))
    }

    async fn find_claim(
        &self,
        source: ClaimSource,
        account: &ExternalAccountId,
    ) -> Result<Option<AccountClaim>> {
        self.claims
            .find_one(doc! {
                "source": source.as_str(),
                "account_identifier": account.as_str(),
            })
            .await?
            .map(AccountClaim::try_from)
            .transpose()
    }
}

#[async_trait]
impl SessionBackend for MongoStore {
    async fn put_session(&self, entry: &SessionEntry) -> Result<()> {
        self.sessions
            .insert_one(CeremonySessionDoc::from(entry))
            .await
    }

    async fn take_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>> {
        let taken = self
            .sessions
            .inner()
            .find_one_and_delete(doc! {
                "purpose": purpose.as_str(),
                "token": token,
                "expires_at": { "$gt": bson_time(now) },
            })
            .await
            .map_err(driver_error("Session take"))?;
        Ok(taken.map(SessionEntry::from))
    }

    async fn peek_session(
        &self,
        purpose: SessionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionEntry>> {
        Ok(self
            .sessions
            .find_one(doc! {
                "purpose": purpose.as_str(),
                "token": token,
                "expires_at": { "$gt": bson_time(now) },
            })
            .await?
            .map(SessionEntry::from))
    }

    async fn delete_session(&self, purpose: SessionPurpose, token: &str) -> Result<bool> {
        let result = self
            .sessions
            .delete_one(doc! { "purpose": purpose.as_str(), "token": token })
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = self
            .sessions
            .delete_many(doc! { "expires_at": { "$lte": bson_time(now) } })
            .await?;
        Ok(usize::try_from(result.deleted_count).unwrap_or(usize::MAX))
    }
}

#[async_trait]
impl VaultStore for MongoStore {
    async fn try_lock(
        &self,
        account: AccountId,
        lock: &VaultLock,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Matches a free or expired lock. When the vault document exists with
        // a live lock nothing matches, the upsert collides with the unique
        // account_id index and the acquisition is refused.
        let filter = doc! {
            "account_id": account.to_string(),
            "$or": [
                { "lock": null },
                { "lock.expires_at": { "$lte": bson_time(now) } },
            ],
        };
        let update = doc! {
            "$set": {
                "lock": VaultLockDoc::to_document(lock),
                "metadata.updated_at": BsonDateTime::now(),
            },
            "$setOnInsert": {
                "data": "",
                "version": 0_i64,
                "metadata.created_at": BsonDateTime::now(),
            },
        };

        match self
            .vaults
            .inner()
            .update_one(filter, update)
            .upsert(true)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => {
                debug!(account_id = %account, "Vault lock held");
                Ok(false)
            }
            Err(e) => Err(CaError::Database(format!("Vault lock failed: {e}"))),
        }
    }

    async fn unlock(&self, account: AccountId, token: LockToken) -> Result<bool> {
        let result = self
            .vaults
            .update_one(
                doc! { "account_id": account.to_string(), "lock.token": token.to_string() },
                doc! {
                    "$unset": { "lock": "" },
                    "$set": { "metadata.updated_at": BsonDateTime::now() },
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn expire_lock(
        &self,
        account: AccountId,
        token: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = self
            .vaults
            .update_one(
                doc! {
                    "account_id": account.to_string(),
                    "lock.token": token.to_string(),
                    "lock.expires_at": { "$lte": bson_time(now) },
                },
                doc! { "$unset": { "lock": "" } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn write_locked(
        &self,
        account: AccountId,
        token: LockToken,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let updated = self
            .vaults
            .inner()
            .find_one_and_update(
                doc! {
                    "account_id": account.to_string(),
                    "lock.token": token.to_string(),
                    "lock.expires_at": { "$gt": bson_time(now) },
                },
                doc! {
                    "$set": {
                        "data": STANDARD.encode(data),
                        "metadata.updated_at": BsonDateTime::now(),
                    },
                    "$inc": { "version": 1_i64 },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(driver_error("Vault write"))?;

        Ok(updated.map(|doc| u64::try_from(doc.version).unwrap_or_default()))
    }

    async fn read_vault(&self, account: AccountId) -> Result<Option<VaultRecord>> {
        self.vaults
            .find_one(doc! { "account_id": account.to_string() })
            .await?
            .map(VaultRecord::try_from)
            .transpose()
    }

    async fn expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<(AccountId, LockToken)>> {
        let docs = self
            .vaults
            .find_many(doc! { "lock.expires_at": { "$lte": bson_time(now) } })
            .await?;

        let mut expired = Vec::with_capacity(docs.len());
        for doc in docs {
            match VaultRecord::try_from(doc) {
                Ok(VaultRecord {
                    account_id,
                    lock: Some(lock),
                    ..
                }) => expired.push((account_id, lock.token)),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable vault document: {}", e),
            }
        }
        Ok(expired)
    }
}

//! Account claim ledger
//!
//! Each external account identifier may be claimed by at most one username.
//! The first claim wins and the owner may claim again any number of times. A
//! different username is refused. Claims are never overwritten or removed.
//!
//! Identifiers live in one namespace per [`ClaimSource`]: an authenticator
//! certificate subject never competes with an issued certificate subject,
//! even when both read the same string.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::logging::{AuditEvent, AuditKind, AuditLog};
use crate::store::ClaimStore;
use crate::types::{CaError, ExternalAccountId, Result};

/// Returned to a username that tries to take someone else's identifier
pub const TAKEN_BY_OTHER_USER: &str = "account already taken by other user";

/// Which certificate's subject names the claimed identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimSource {
    /// The certificate just issued; its subject is the username
    IssuedCertificate,
    /// The authenticator certificate presented with the request
    AuthenticatorCertificate,
}

impl ClaimSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssuedCertificate => "issued_certificate",
            Self::AuthenticatorCertificate => "authenticator_certificate",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "issued_certificate" => Ok(Self::IssuedCertificate),
            "authenticator_certificate" => Ok(Self::AuthenticatorCertificate),
            other => Err(CaError::Database(format!("Unknown claim source: {other}"))),
        }
    }
}

impl std::fmt::Display for ClaimSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountClaim {
    pub source: ClaimSource,
    pub account_id: ExternalAccountId,
    pub username: String,
    pub claimed_at: DateTime<Utc>,
}

/// Result of an atomic claim attempt at the storage layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First claim, now recorded
    Inserted,
    /// Same username already owns it
    AlreadyOwned,
    /// Owned by the contained username
    OwnedBy(String),
}

impl ClaimOutcome {
    /// Outcome of claiming for `username` against an existing claim
    pub fn against(existing: &AccountClaim, username: &str) -> Self {
        if existing.username == username {
            Self::AlreadyOwned
        } else {
            Self::OwnedBy(existing.username.clone())
        }
    }
}

#[derive(Clone)]
pub struct AccountClaimLedger {
    store: Arc<dyn ClaimStore>,
    audit: AuditLog,
}

impl AccountClaimLedger {
    pub fn new(store: Arc<dyn ClaimStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Claim `account_id` in the `source` namespace for `username`.
    ///
    /// Succeeds on a first claim and on a repeat claim by the owner;
    /// `Conflict` if another username owns the identifier.
    pub async fn claim(
        &self,
        source: ClaimSource,
        account_id: &ExternalAccountId,
        username: &str,
    ) -> Result<()> {
        if username.is_empty() {
            return Err(CaError::BadRequest("username is empty".into()));
        }

        let claim = AccountClaim {
            source,
            account_id: account_id.clone(),
            username: username.to_string(),
            claimed_at: Utc::now(),
        };

        match self.store.insert_claim_if_absent(&claim).await? {
            ClaimOutcome::Inserted => {
                info!(source = %source, account = %account_id, username = %username, "Account claimed");
                self.audit
                    .log(
                        AuditEvent::new(AuditKind::ClaimRecorded)
                            .with_username(username)
                            .with_subject(account_id),
                    )
                    .await;
                Ok(())
            }
            ClaimOutcome::AlreadyOwned => {
                debug!(account = %account_id, username = %username, "Account already claimed by owner");
                Ok(())
            }
            ClaimOutcome::OwnedBy(owner) => {
                warn!(
                    source = %source,
                    account = %account_id,
                    username = %username,
                    owner = %owner,
                    "Account claim refused"
                );
                self.audit
                    .log(
                        AuditEvent::new(AuditKind::ClaimRejected)
                            .with_username(username)
                            .with_subject(account_id)
                            .with_reason("conflict"),
                    )
                    .await;
                Err(CaError::Conflict(TAKEN_BY_OTHER_USER.into()))
            }
        }
    }

    pub async fn owner_of(
        &self,
        source: ClaimSource,
        account_id: &ExternalAccountId,
    ) -> Result<Option<String>> {
        Ok(self
            .store
            .find_claim(source, account_id)
            .await?
            .map(|claim| claim.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> AccountClaimLedger {
        AccountClaimLedger::new(Arc::new(MemoryStore::new()), AuditLog::disabled())
    }

    fn id(s: &str) -> ExternalAccountId {
        ExternalAccountId::new(s).unwrap()
    }

    const ISSUED: ClaimSource = ClaimSource::IssuedCertificate;
    const AUTHENTICATOR: ClaimSource = ClaimSource::AuthenticatorCertificate;

    #[tokio::test]
    async fn test_owner_can_reclaim() {
        let ledger = ledger();
        ledger.claim(AUTHENTICATOR, &id("A1"), "alice").await.unwrap();
        ledger.claim(AUTHENTICATOR, &id("A1"), "alice").await.unwrap();
        assert_eq!(ledger.owner_of(AUTHENTICATOR, &id("A1")).await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_other_user_conflicts() {
        let ledger = ledger();
        ledger.claim(AUTHENTICATOR, &id("A1"), "alice").await.unwrap();

        let err = ledger.claim(AUTHENTICATOR, &id("A1"), "bob").await.unwrap_err();
        assert!(matches!(err, CaError::Conflict(ref msg) if msg == TAKEN_BY_OTHER_USER));

        // The original owner is untouched
        assert_eq!(ledger.owner_of(AUTHENTICATOR, &id("A1")).await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_one_user_may_hold_many_identifiers() {
        let ledger = ledger();
        ledger.claim(AUTHENTICATOR, &id("A1"), "alice").await.unwrap();
        ledger.claim(AUTHENTICATOR, &id("A2"), "alice").await.unwrap();
        assert!(ledger.owner_of(AUTHENTICATOR, &id("A3")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_claims_have_one_winner() {
        let ledger = ledger();
        let account = id("A1");

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            let account = account.clone();
            handles.push(tokio::spawn(async move {
                ledger.claim(AUTHENTICATOR, &account, &format!("user{i}")).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sources_are_separate_namespaces() {
        let ledger = ledger();
        ledger.claim(AUTHENTICATOR, &id("bob"), "mallory").await.unwrap();

        // Same string, other namespace: bob's own claim is unaffected
        ledger.claim(ISSUED, &id("bob"), "bob").await.unwrap();
        assert_eq!(ledger.owner_of(ISSUED, &id("bob")).await.unwrap().as_deref(), Some("bob"));
        assert_eq!(
            ledger.owner_of(AUTHENTICATOR, &id("bob")).await.unwrap().as_deref(),
            Some("mallory")
        );
    }

    #[test]
    fn test_claim_source_names_roundtrip() {
        for source in [ISSUED, AUTHENTICATOR] {
            assert_eq!(ClaimSource::parse(source.as_str()).unwrap(), source);
        }
        assert!(ClaimSource::parse("username").is_err());
    }
}

//! Account directory
//!
//! Accounts are created when a registration ceremony begins. The username is
//! immutable and unique; the internal [`AccountId`] is what every other record
//! references. An [`Account`] is what the ceremony layer sees as its user,
//! through the [`CeremonyUser`] capability.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::AccountStore;
use crate::types::{AccountId, CaError, Result};

pub const USERNAME_MIN_CHARS: usize = 2;
pub const USERNAME_MAX_CHARS: usize = 25;

/// Default domain appended to usernames to form display names
pub const DEFAULT_DISPLAY_DOMAIN: &str = "letsauth.org";

/// A WebAuthn credential as recorded after a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub credential_id: Vec<u8>,
    /// COSE-encoded credential public key
    pub public_key: Vec<u8>,
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    /// Set once a non-increasing signature counter was observed
    #[serde(default)]
    pub clone_warning: bool,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub credentials: Vec<CredentialRecord>,
}

impl Account {
    pub fn new(username: &str, display_domain: &str) -> Self {
        Self {
            id: AccountId::new(),
            username: username.to_string(),
            display_name: display_name_for(username, display_domain),
            created_at: Utc::now(),
            credentials: Vec::new(),
        }
    }

    pub fn credential(&self, credential_id: &[u8]) -> Option<&CredentialRecord> {
        self.credentials
            .iter()
            .find(|c| c.credential_id == credential_id)
    }
}

/// What the ceremony layer needs to know about a user
pub trait CeremonyUser: Send + Sync {
    /// Stable binary user handle
    fn user_handle(&self) -> Vec<u8>;

    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn credentials(&self) -> &[CredentialRecord];

    fn credential_ids(&self) -> Vec<Vec<u8>> {
        self.credentials()
            .iter()
            .map(|c| c.credential_id.clone())
            .collect()
    }
}

impl CeremonyUser for Account {
    fn user_handle(&self) -> Vec<u8> {
        self.id.to_bytes().to_vec()
    }

    fn name(&self) -> &str {
        &self.username
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn credentials(&self) -> &[CredentialRecord] {
        &self.credentials
    }
}

/// Check the username rule: 2 to 25 Unicode letters or digits.
pub fn validate_username(username: &str) -> Result<()> {
    let chars = username.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&chars) {
        return Err(CaError::BadRequest(format!(
            "username must be {USERNAME_MIN_CHARS}-{USERNAME_MAX_CHARS} characters"
        )));
    }
    if !username.chars().all(char::is_alphanumeric) {
        return Err(CaError::BadRequest(
            "username may contain only letters and digits".into(),
        ));
    }
    Ok(())
}

pub fn display_name_for(username: &str, display_domain: &str) -> String {
    format!("{username}@{display_domain}")
}

/// Account lookups and mutations on top of an [`AccountStore`]
#[derive(Clone)]
pub struct AccountDirectory {
    store: Arc<dyn AccountStore>,
    display_domain: String,
}

impl AccountDirectory {
    pub fn new(store: Arc<dyn AccountStore>, display_domain: impl Into<String>) -> Self {
        Self {
            store,
            display_domain: display_domain.into(),
        }
    }

    /// Create a fresh account; `Conflict` if the username exists.
    pub async fn create(&self, username: &str) -> Result<Account> {
        validate_username(username)?;

        let account = Account::new(username, &self.display_domain);
        self.store.insert_account(&account).await?;

        info!(username = %username, account_id = %account.id, "Account created");
        Ok(account)
    }

    /// Account for a registration that is starting.
    ///
    /// An account without credentials belongs to a registration that never
    /// finished; it is handed out again instead of blocking the name.
    pub async fn begin_or_reclaim(&self, username: &str) -> Result<Account> {
        validate_username(username)?;

        match self.store.find_account_by_username(username).await? {
            Some(existing) if existing.credentials.is_empty() => {
                debug!(username = %username, "Reclaiming unfinished registration");
                Ok(existing)
            }
            Some(_) => Err(CaError::Conflict("user already exists".into())),
            None => self.create(username).await,
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.store.find_account_by_username(username).await
    }

    pub async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        self.store.find_account(id).await
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Account> {
        self.find_by_username(username)
            .await?
            .ok_or_else(|| CaError::NotFound(format!("no account named {username}")))
    }

    pub async fn add_credential(&self, id: AccountId, record: CredentialRecord) -> Result<()> {
        if !self.store.push_credential(id, &record).await? {
            return Err(CaError::NotFound(format!("account {id}")));
        }
        debug!(account_id = %id, "Credential recorded");
        Ok(())
    }

    /// Store a new signature counter for a credential.
    ///
    /// Returns whether the credential is flagged as possibly cloned: a counter
    /// that fails to increase, when either value is non-zero, sets the flag
    /// and it stays set.
    pub async fn update_sign_count(
        &self,
        id: AccountId,
        credential_id: &[u8],
        sign_count: u32,
    ) -> Result<bool> {
        let account = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| CaError::NotFound(format!("account {id}")))?;
        let current = account
            .credential(credential_id)
            .ok_or_else(|| CaError::NotFound("credential".into()))?;

        let regressed =
            (sign_count != 0 || current.sign_count != 0) && sign_count <= current.sign_count;
        let clone_warning = current.clone_warning || regressed;
        if regressed {
            warn!(
                username = %account.username,
                stored = current.sign_count,
                received = sign_count,
                "Authenticator counter did not increase"
            );
        }

        let updated = self
            .store
            .update_credential_counter(id, credential_id, sign_count, clone_warning)
            .await?;
        if !updated {
            return Err(CaError::NotFound("credential".into()));
        }
        Ok(clone_warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn directory() -> AccountDirectory {
        AccountDirectory::new(Arc::new(MemoryStore::new()), DEFAULT_DISPLAY_DOMAIN)
    }

    fn credential(id: u8) -> CredentialRecord {
        CredentialRecord {
            credential_id: vec![id; 16],
            public_key: vec![0xa5, 0x01],
            aaguid: vec![0; 16],
            sign_count: 0,
            clone_warning: false,
        }
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("al").is_ok());
        assert!(validate_username("ålice42").is_ok());
        assert!(validate_username("a").is_err());
        assert!(validate_username(&"a".repeat(26)).is_err());
        assert!(validate_username("al ice").is_err());
        assert!(validate_username("alice!").is_err());
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let dir = directory();
        let account = dir.create("alice").await.unwrap();
        assert_eq!(account.display_name, "alice@letsauth.org");

        let found = dir.get_by_username("alice").await.unwrap();
        assert_eq!(found.id, account.id);
        assert_eq!(found.user_handle(), account.id.to_bytes().to_vec());

        let err = dir.get_by_username("bob").await.unwrap_err();
        assert!(matches!(err, CaError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let dir = directory();
        dir.create("alice").await.unwrap();
        let err = dir.create("alice").await.unwrap_err();
        assert!(matches!(err, CaError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reclaim_only_without_credentials() {
        let dir = directory();
        let first = dir.begin_or_reclaim("alice").await.unwrap();
        let again = dir.begin_or_reclaim("alice").await.unwrap();
        assert_eq!(first.id, again.id);

        dir.add_credential(first.id, credential(1)).await.unwrap();
        let err = dir.begin_or_reclaim("alice").await.unwrap_err();
        assert!(matches!(err, CaError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sign_count_regression_sets_clone_warning() {
        let dir = directory();
        let account = dir.create("alice").await.unwrap();
        dir.add_credential(account.id, credential(7)).await.unwrap();

        assert!(!dir.update_sign_count(account.id, &[7; 16], 5).await.unwrap());
        assert!(dir.update_sign_count(account.id, &[7; 16], 5).await.unwrap());

        // Flag is sticky
        assert!(dir.update_sign_count(account.id, &[7; 16], 9).await.unwrap());

        let stored = dir.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.credentials[0].sign_count, 9);
        assert!(stored.credentials[0].clone_warning);
    }

    #[tokio::test]
    async fn test_zero_counters_are_not_a_regression() {
        let dir = directory();
        let account = dir.create("alice").await.unwrap();
        dir.add_credential(account.id, credential(3)).await.unwrap();

        assert!(!dir.update_sign_count(account.id, &[3; 16], 0).await.unwrap());
    }
}

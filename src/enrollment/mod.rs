//! Registration and login ceremonies
//!
//! The ceremony cryptography lives behind [`CeremonyProvider`]; this module
//! carries ceremony state between steps through the session store, creates
//! accounts, records credentials and registers the authenticator key that
//! later authorizes certificate requests.
//!
//! ```text
//! begin_registration --(carrier: create)--> finish_registration --> identity carrier
//! begin_login        --(carrier: login)---> finish_login        --> identity carrier
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::accounts::{Account, AccountDirectory, CeremonyUser, CredentialRecord};
use crate::registry::{normalize_key_input, AuthenticatorKeyRegistry};
use crate::sessions::{CeremonySessionStore, CeremonyState, SessionPurpose};
use crate::types::{CaError, Result};

/// Result of a successful login assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAssertion {
    pub credential_id: Vec<u8>,
    pub sign_count: u32,
}

/// External WebAuthn implementation
///
/// `begin_*` return the options to send to the client (opaque JSON) and the
/// state to keep until the matching `finish_*`.
pub trait CeremonyProvider: Send + Sync {
    fn begin_registration(&self, user: &dyn CeremonyUser) -> Result<(Value, CeremonyState)>;

    fn finish_registration(
        &self,
        user: &dyn CeremonyUser,
        state: &CeremonyState,
        response: &Value,
    ) -> Result<CredentialRecord>;

    fn begin_login(&self, user: &dyn CeremonyUser) -> Result<(Value, CeremonyState)>;

    fn finish_login(
        &self,
        user: &dyn CeremonyUser,
        state: &CeremonyState,
        response: &Value,
    ) -> Result<LoginAssertion>;
}

/// Relying-party parameters handed to a [`CeremonyProvider`] when it is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub origin: String,
    pub display_name: String,
}

/// Options for the client plus the carrier to present at the finish step
#[derive(Debug, Clone)]
pub struct CeremonyStart {
    pub options: Value,
    pub carrier: String,
}

#[derive(Clone)]
pub struct EnrollmentCoordinator {
    accounts: AccountDirectory,
    registry: AuthenticatorKeyRegistry,
    sessions: CeremonySessionStore,
    provider: Arc<dyn CeremonyProvider>,
}

impl EnrollmentCoordinator {
    pub fn new(
        accounts: AccountDirectory,
        registry: AuthenticatorKeyRegistry,
        sessions: CeremonySessionStore,
        provider: Arc<dyn CeremonyProvider>,
    ) -> Self {
        Self {
            accounts,
            registry,
            sessions,
            provider,
        }
    }

    pub async fn begin_registration(&self, username: &str) -> Result<CeremonyStart> {
        let account = self.accounts.begin_or_reclaim(username).await?;
        let (options, state) = self.provider.begin_registration(&account)?;
        let carrier = self.sessions.save(SessionPurpose::Create, &state).await?;
        Ok(CeremonyStart { options, carrier })
    }

    /// Complete registration and register `authenticator_key` (PEM, DER or
    /// base64 of either) for the account. Returns an identity carrier.
    pub async fn finish_registration(
        &self,
        username: &str,
        carrier: &str,
        response: &Value,
        authenticator_key: &[u8],
    ) -> Result<String> {
        // An unusable key is refused before the carrier is spent
        let key_pem = normalize_key_input(authenticator_key)?;

        let state = self.sessions.load(SessionPurpose::Create, carrier).await?;
        let account = self.ceremony_account(username, &state).await?;

        let credential = self
            .provider
            .finish_registration(&account, &state, response)?;

        // The first credential marks the registration complete, so it is
        // recorded last
        self.registry
            .register_key(account.id, key_pem.as_bytes())
            .await?;
        self.accounts.add_credential(account.id, credential).await?;

        info!(username = %username, "Registration completed");
        self.sessions.save_identity(username).await
    }

    pub async fn begin_login(&self, username: &str) -> Result<CeremonyStart> {
        let account = self.accounts.get_by_username(username).await?;
        if account.credentials.is_empty() {
            return Err(CaError::BadRequest("account has no credentials".into()));
        }

        let (options, state) = self.provider.begin_login(&account)?;
        let carrier = self.sessions.save(SessionPurpose::Login, &state).await?;
        Ok(CeremonyStart { options, carrier })
    }

    /// Complete login, record the new signature counter and return an
    /// identity carrier.
    pub async fn finish_login(
        &self,
        username: &str,
        carrier: &str,
        response: &Value,
    ) -> Result<String> {
        let state = self.sessions.load(SessionPurpose::Login, carrier).await?;
        let account = self.ceremony_account(username, &state).await?;

        let assertion = self.provider.finish_login(&account, &state, response)?;
        self.accounts
            .update_sign_count(account.id, &assertion.credential_id, assertion.sign_count)
            .await?;

        info!(username = %username, "Login completed");
        self.sessions.save_identity(username).await
    }

    /// Username of a logged-in identity carrier
    pub async fn whoami(&self, identity_carrier: &str) -> Result<String> {
        self.sessions.load_identity(identity_carrier).await
    }

    pub async fn logout(&self, identity_carrier: &str) -> Result<()> {
        self.sessions.delete_identity(identity_carrier).await
    }

    /// The account a finish step refers to; the ceremony must have been
    /// started for that same account.
    async fn ceremony_account(&self, username: &str, state: &CeremonyState) -> Result<Account> {
        let account = self.accounts.get_by_username(username).await?;
        if state.user_id() != account.user_handle().as_slice() {
            return Err(CaError::BadRequest(
                "ceremony was started for another user".into(),
            ));
        }
        Ok(account)
    }
}

//! Ceremony session store
//!
//! Short-lived state between the begin and finish steps of a ceremony, plus
//! the identity session handed out once a ceremony completes.
//!
//! - Ceremony sessions (`create`, `login`) are one-time readable: `load`
//!   takes and deletes the entry in a single backend call.
//! - Identity sessions are read without being consumed and deleted on logout.
//! - Expiry is checked on every access; `purge_expired` reclaims storage.
//!
//! Every failure to produce state (unknown, consumed, expired, tampered
//! carrier, wrong purpose) is reported as `MissingOrExpired`.

pub mod carrier;
pub mod payload;

pub use carrier::{CarrierClaims, SessionKey};
pub use payload::{CeremonyState, SessionPayload, SessionPurpose, UserVerification};

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::SessionBackend;
use crate::types::{expiry_after, generate_random_bytes, CaError, Result};

/// Lifetime of a ceremony session
pub const DEFAULT_CEREMONY_TTL: Duration = Duration::from_secs(30);

/// Lifetime of an identity session
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(30);

/// Stored session entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub purpose: SessionPurpose,
    pub token: String,
    /// Versioned envelope, see [`payload::encode`]
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone)]
pub struct CeremonySessionStore {
    backend: Arc<dyn SessionBackend>,
    key: Arc<SessionKey>,
    ceremony_ttl: Duration,
    identity_ttl: Duration,
}

impl CeremonySessionStore {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        key: SessionKey,
        ceremony_ttl: Duration,
        identity_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            key: Arc::new(key),
            ceremony_ttl,
            identity_ttl,
        }
    }

    /// Store ceremony state and return the carrier for the client.
    pub async fn save(&self, purpose: SessionPurpose, state: &CeremonyState) -> Result<String> {
        if !purpose.is_ceremony() {
            return Err(CaError::BadRequest(format!(
                "{purpose} is not a ceremony purpose"
            )));
        }
        let payload = SessionPayload::Ceremony {
            state: state.clone(),
        };
        self.put(purpose, self.ceremony_ttl, &payload).await
    }

    /// Take the ceremony state behind a carrier. Works at most once.
    pub async fn load(&self, purpose: SessionPurpose, carrier: &str) -> Result<CeremonyState> {
        let claims = self.open(purpose, carrier)?;

        let entry = self
            .backend
            .take_session(purpose, &claims.token, Utc::now())
            .await?
            .ok_or(CaError::MissingOrExpired)?;

        match payload::decode(&entry.payload) {
            Some(SessionPayload::Ceremony { state }) => Ok(state),
            _ => {
                warn!(purpose = %purpose, "Unreadable ceremony session payload");
                Err(CaError::MissingOrExpired)
            }
        }
    }

    /// Start an identity session for a user who completed a ceremony
    pub async fn save_identity(&self, username: &str) -> Result<String> {
        let payload = SessionPayload::Identity {
            username: username.to_string(),
        };
        self.put(SessionPurpose::Identity, self.identity_ttl, &payload)
            .await
    }

    /// Username behind an identity carrier; the session stays valid.
    pub async fn load_identity(&self, carrier: &str) -> Result<String> {
        let claims = self.open(SessionPurpose::Identity, carrier)?;

        let entry = self
            .backend
            .peek_session(SessionPurpose::Identity, &claims.token, Utc::now())
            .await?
            .ok_or(CaError::MissingOrExpired)?;

        match payload::decode(&entry.payload) {
            Some(SessionPayload::Identity { username }) => Ok(username),
            _ => Err(CaError::MissingOrExpired),
        }
    }

    /// Logout. Deleting an unknown or already deleted session succeeds.
    pub async fn delete_identity(&self, carrier: &str) -> Result<()> {
        let Some(claims) = carrier::open(&self.key, SessionPurpose::Identity, carrier) else {
            return Ok(());
        };
        let removed = self
            .backend
            .delete_session(SessionPurpose::Identity, &claims.token)
            .await?;
        debug!(removed, "Identity session deleted");
        Ok(())
    }

    /// Drop expired entries of every purpose
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.backend.purge_sessions(Utc::now()).await?;
        if purged > 0 {
            debug!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    async fn put(
        &self,
        purpose: SessionPurpose,
        ttl: Duration,
        payload: &SessionPayload,
    ) -> Result<String> {
        let token = URL_SAFE_NO_PAD.encode(generate_random_bytes::<32>());
        let expires_at = expiry_after(ttl)?;

        self.backend
            .put_session(&SessionEntry {
                purpose,
                token: token.clone(),
                payload: payload::encode(payload)?,
                created_at: Utc::now(),
                expires_at,
            })
            .await?;

        carrier::seal(&self.key, &CarrierClaims::new(purpose, token, expires_at))
    }

    fn open(&self, purpose: SessionPurpose, carrier: &str) -> Result<CarrierClaims> {
        let claims =
            carrier::open(&self.key, purpose, carrier).ok_or(CaError::MissingOrExpired)?;
        if Utc::now() >= claims.expires_at {
            return Err(CaError::MissingOrExpired);
        }
        Ok(claims)
    }
}

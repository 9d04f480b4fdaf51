//! Typed session state and its versioned envelope

use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Current envelope version
pub const ENVELOPE_VERSION: u32 = 1;

/// What a session is for. Bound into the carrier so a login carrier can
/// never be replayed as a registration carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPurpose {
    /// Registration ceremony in progress
    Create,
    /// Login ceremony in progress
    Login,
    /// Authenticated user after a completed ceremony
    Identity,
}

impl SessionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Login => "login",
            Self::Identity => "identity",
        }
    }

    pub fn is_ceremony(&self) -> bool {
        matches!(self, Self::Create | Self::Login)
    }
}

impl std::fmt::Display for SessionPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

/// Server-side state a ceremony needs between its begin and finish steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CeremonyState {
    Registration {
        challenge: Vec<u8>,
        user_id: Vec<u8>,
        user_verification: UserVerification,
    },
    Login {
        challenge: Vec<u8>,
        user_id: Vec<u8>,
        allowed_credentials: Vec<Vec<u8>>,
        user_verification: UserVerification,
    },
}

impl CeremonyState {
    pub fn challenge(&self) -> &[u8] {
        match self {
            Self::Registration { challenge, .. } | Self::Login { challenge, .. } => challenge,
        }
    }

    pub fn user_id(&self) -> &[u8] {
        match self {
            Self::Registration { user_id, .. } | Self::Login { user_id, .. } => user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionPayload {
    Ceremony { state: CeremonyState },
    Identity { username: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    payload: SessionPayload,
}

/// Serialise a payload into its stored form
pub fn encode(payload: &SessionPayload) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        version: ENVELOPE_VERSION,
        payload: payload.clone(),
    })?)
}

/// Parse a stored payload; `None` for unknown versions or shapes
pub fn decode(stored: &str) -> Option<SessionPayload> {
    let envelope: Envelope = serde_json::from_str(stored).ok()?;
    (envelope.version == ENVELOPE_VERSION).then_some(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let payload = SessionPayload::Identity {
            username: "alice".into(),
        };
        let stored = encode(&payload).unwrap();
        assert_eq!(
            stored,
            r#"{"version":1,"payload":{"kind":"identity","username":"alice"}}"#
        );
        assert_eq!(decode(&stored), Some(payload));
    }

    #[test]
    fn test_unknown_version_is_unreadable() {
        let stored = r#"{"version":2,"payload":{"kind":"identity","username":"alice"}}"#;
        assert_eq!(decode(stored), None);
        assert_eq!(decode("not json"), None);
    }

    #[test]
    fn test_ceremony_state_accessors() {
        let state = CeremonyState::Login {
            challenge: vec![1, 2, 3],
            user_id: vec![9; 16],
            allowed_credentials: vec![vec![7]],
            user_verification: UserVerification::Preferred,
        };
        assert_eq!(state.challenge(), &[1, 2, 3]);
        assert_eq!(state.user_id(), &[9; 16]);
    }
}

//! Registration and login ceremony integration tests
//!
//! A fake ceremony provider stands in for WebAuthn: the "authenticator"
//! response just echoes the challenge back with a credential id and counter.

mod common;

use std::sync::Arc;

use common::{service, Authenticator};
use lintel::accounts::{CeremonyUser, CredentialRecord};
use lintel::enrollment::{CeremonyProvider, EnrollmentCoordinator, LoginAssertion};
use lintel::sessions::{CeremonyState, UserVerification};
use lintel::{CaError, CaService, Result};
use serde_json::{json, Value};

struct FakeProvider;

impl FakeProvider {
    fn check_challenge(state: &CeremonyState, response: &Value) -> Result<()> {
        let echoed = response["challenge"].as_str().unwrap_or_default();
        if echoed != hex::encode(state.challenge()) {
            return Err(CaError::BadRequest("challenge mismatch".into()));
        }
        Ok(())
    }

    fn credential_id(response: &Value) -> Vec<u8> {
        response["credential_id"]
            .as_str()
            .unwrap_or_default()
            .as_bytes()
            .to_vec()
    }

    fn sign_count(response: &Value) -> u32 {
        response["sign_count"].as_u64().unwrap_or_default() as u32
    }
}

impl CeremonyProvider for FakeProvider {
    fn begin_registration(&self, user: &dyn CeremonyUser) -> Result<(Value, CeremonyState)> {
        let challenge = lintel::types::generate_random_bytes::<32>().to_vec();
        let options = json!({
            "challenge": hex::encode(&challenge),
            "user": { "name": user.name(), "displayName": user.display_name() },
        });
        Ok((
            options,
            CeremonyState::Registration {
                challenge,
                user_id: user.user_handle(),
                user_verification: UserVerification::Preferred,
            },
        ))
    }

    fn finish_registration(
        &self,
        _user: &dyn CeremonyUser,
        state: &CeremonyState,
        response: &Value,
    ) -> Result<CredentialRecord> {
        Self::check_challenge(state, response)?;
        Ok(CredentialRecord {
            credential_id: Self::credential_id(response),
            public_key: vec![0xa5, 0x01, 0x02],
            aaguid: vec![0; 16],
            sign_count: Self::sign_count(response),
            clone_warning: false,
        })
    }

    fn begin_login(&self, user: &dyn CeremonyUser) -> Result<(Value, CeremonyState)> {
        let challenge = lintel::types::generate_random_bytes::<32>().to_vec();
        let allowed = user.credential_ids();
        let options = json!({
            "challenge": hex::encode(&challenge),
            "allowCredentials": allowed.iter().map(hex::encode).collect::<Vec<_>>(),
        });
        Ok((
            options,
            CeremonyState::Login {
                challenge,
                user_id: user.user_handle(),
                allowed_credentials: allowed,
                user_verification: UserVerification::Preferred,
            },
        ))
    }

    fn finish_login(
        &self,
        _user: &dyn CeremonyUser,
        state: &CeremonyState,
        response: &Value,
    ) -> Result<LoginAssertion> {
        Self::check_challenge(state, response)?;
        let credential_id = Self::credential_id(response);
        if let CeremonyState::Login {
            allowed_credentials,
            ..
        } = state
        {
            if !allowed_credentials.contains(&credential_id) {
                return Err(CaError::Unauthorized("credential not allowed".into()));
            }
        }
        Ok(LoginAssertion {
            credential_id,
            sign_count: Self::sign_count(response),
        })
    }
}

fn setup() -> (CaService, EnrollmentCoordinator) {
    let service = service();
    let enrollment = service.enrollment(Arc::new(FakeProvider));
    (service, enrollment)
}

fn answer(options: &Value, credential_id: &str, sign_count: u32) -> Value {
    json!({
        "challenge": options["challenge"],
        "credential_id": credential_id,
        "sign_count": sign_count,
    })
}

async fn register(enrollment: &EnrollmentCoordinator, username: &str, device: &Authenticator) -> String {
    let start = enrollment.begin_registration(username).await.unwrap();
    enrollment
        .finish_registration(
            username,
            &start.carrier,
            &answer(&start.options, "cred-1", 1),
            device.public_key_pem().as_bytes(),
        )
        .await
        .unwrap()
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_registration_creates_account_and_key() {
    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let identity = register(&enrollment, "alice", &device).await;
    assert_eq!(enrollment.whoami(&identity).await.unwrap(), "alice");

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    assert_eq!(alice.display_name, "alice@letsauth.org");
    assert_eq!(alice.credentials.len(), 1);
    assert!(service
        .registry
        .is_authorized(alice.id, &device.public_key_pem())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_registered_key_can_get_certificate() {
    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");
    register(&enrollment, "alice", &device).await;

    let csr = device.csr("alice");
    service
        .issuance
        .authorize_and_issue("alice", &csr, &device.sign(&csr), &device.cert_pem)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_base64_wrapped_key_is_registered() {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let start = enrollment.begin_registration("alice").await.unwrap();
    let wrapped = STANDARD.encode(device.public_key_pem());
    enrollment
        .finish_registration(
            "alice",
            &start.carrier,
            &answer(&start.options, "cred-1", 0),
            wrapped.as_bytes(),
        )
        .await
        .unwrap();

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    let keys = service.registry.keys_for(alice.id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key_pem, device.public_key_pem());
}

#[tokio::test]
async fn test_invalid_usernames_are_rejected() {
    let (_service, enrollment) = setup();

    for username in ["a", "alice smith", "bob!", "abcdefghijklmnopqrstuvwxyz"] {
        let err = enrollment.begin_registration(username).await.unwrap_err();
        assert!(matches!(err, CaError::BadRequest(_)), "{username}");
    }
}

#[tokio::test]
async fn test_abandoned_registration_can_be_restarted() {
    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");

    // First attempt never finishes
    enrollment.begin_registration("alice").await.unwrap();
    let first = service.accounts.get_by_username("alice").await.unwrap();

    register(&enrollment, "alice", &device).await;
    let after = service.accounts.get_by_username("alice").await.unwrap();
    assert_eq!(first.id, after.id);
    assert_eq!(after.credentials.len(), 1);
}

#[tokio::test]
async fn test_completed_username_cannot_be_registered_again() {
    let (_service, enrollment) = setup();
    register(&enrollment, "alice", &Authenticator::new("A1")).await;

    let err = enrollment.begin_registration("alice").await.unwrap_err();
    assert!(matches!(err, CaError::Conflict(_)));
}

#[tokio::test]
async fn test_registration_carrier_works_once() {
    let (_service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let start = enrollment.begin_registration("alice").await.unwrap();
    let response = answer(&start.options, "cred-1", 0);
    enrollment
        .finish_registration("alice", &start.carrier, &response, device.public_key_pem().as_bytes())
        .await
        .unwrap();

    let err = enrollment
        .finish_registration("alice", &start.carrier, &response, device.public_key_pem().as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::MissingOrExpired));
}

#[tokio::test]
async fn test_carrier_for_other_user_is_rejected() {
    let (_service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let alice = enrollment.begin_registration("alice").await.unwrap();
    enrollment.begin_registration("bob").await.unwrap();

    let err = enrollment
        .finish_registration(
            "bob",
            &alice.carrier,
            &answer(&alice.options, "cred-1", 0),
            device.public_key_pem().as_bytes(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}

#[tokio::test]
async fn test_failed_ceremony_records_nothing() {
    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let start = enrollment.begin_registration("alice").await.unwrap();
    let wrong = json!({ "challenge": "00", "credential_id": "cred-1", "sign_count": 0 });
    let err = enrollment
        .finish_registration("alice", &start.carrier, &wrong, device.public_key_pem().as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    assert!(alice.credentials.is_empty());
    assert!(service.registry.keys_for(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_key_leaves_username_reclaimable() {
    let (service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let start = enrollment.begin_registration("alice").await.unwrap();
    let response = answer(&start.options, "cred-1", 0);
    let err = enrollment
        .finish_registration("alice", &start.carrier, &response, b"not a key")
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::MalformedInput(_)));

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    assert!(alice.credentials.is_empty());
    assert!(service.registry.keys_for(alice.id).await.unwrap().is_empty());

    // The carrier was not spent
    enrollment
        .finish_registration("alice", &start.carrier, &response, device.public_key_pem().as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_restart_after_bad_key() {
    let (_service, enrollment) = setup();
    let device = Authenticator::new("A1");

    let start = enrollment.begin_registration("alice").await.unwrap();
    enrollment
        .finish_registration("alice", &start.carrier, &answer(&start.options, "cred-1", 0), b"")
        .await
        .unwrap_err();

    register(&enrollment, "alice", &device).await;
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_updates_sign_count() {
    let (service, enrollment) = setup();
    register(&enrollment, "alice", &Authenticator::new("A1")).await;

    let start = enrollment.begin_login("alice").await.unwrap();
    let identity = enrollment
        .finish_login("alice", &start.carrier, &answer(&start.options, "cred-1", 5))
        .await
        .unwrap();
    assert_eq!(enrollment.whoami(&identity).await.unwrap(), "alice");

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    let credential = alice.credential(b"cred-1").unwrap();
    assert_eq!(credential.sign_count, 5);
    assert!(!credential.clone_warning);
}

#[tokio::test]
async fn test_counter_regression_flags_clone() {
    let (service, enrollment) = setup();
    register(&enrollment, "alice", &Authenticator::new("A1")).await;

    for count in [7, 3] {
        let start = enrollment.begin_login("alice").await.unwrap();
        enrollment
            .finish_login("alice", &start.carrier, &answer(&start.options, "cred-1", count))
            .await
            .unwrap();
    }

    let alice = service.accounts.get_by_username("alice").await.unwrap();
    assert!(alice.credential(b"cred-1").unwrap().clone_warning);
}

#[tokio::test]
async fn test_login_without_credentials_is_bad_request() {
    let (_service, enrollment) = setup();
    enrollment.begin_registration("alice").await.unwrap();

    let err = enrollment.begin_login("alice").await.unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}

#[tokio::test]
async fn test_login_carrier_is_not_a_registration_carrier() {
    let (_service, enrollment) = setup();
    let device = Authenticator::new("A1");
    register(&enrollment, "alice", &device).await;

    let start = enrollment.begin_login("alice").await.unwrap();
    let err = enrollment
        .finish_registration(
            "alice",
            &start.carrier,
            &answer(&start.options, "cred-2", 0),
            device.public_key_pem().as_bytes(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::MissingOrExpired));
}

#[tokio::test]
async fn test_logout_ends_identity() {
    let (_service, enrollment) = setup();
    let identity = register(&enrollment, "alice", &Authenticator::new("A1")).await;

    enrollment.logout(&identity).await.unwrap();
    let err = enrollment.whoami(&identity).await.unwrap_err();
    assert!(matches!(err, CaError::MissingOrExpired));

    // Logging out twice is harmless
    enrollment.logout(&identity).await.unwrap();
}

//! Shared fixtures: root authority, authenticators and signed CSRs
//!
//! The RSA authenticator under `tests/fixtures/` was made with openssl: a
//! 2048-bit PKCS#8 key, its self-signed certificate (CN=A1) and a SHA-256 CSR
//! with CN=alice over the same key.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use rcgen::{CertificateParams, DnType, KeyPair, SanType};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING, RSA_PKCS1_SHA256};

use lintel::certs::{codec, sign_root_certificate, RootAuthority, RootProfile};
use lintel::sessions::SessionKey;
use lintel::CaService;

pub fn root_authority() -> RootAuthority {
    let key = KeyPair::generate().unwrap();
    let cert = sign_root_certificate(&key, &RootProfile::default()).unwrap();
    RootAuthority::from_pem(&key.serialize_pem(), &cert).unwrap()
}

pub fn service() -> CaService {
    CaService::in_memory(root_authority(), SessionKey::generate())
}

/// An authenticator device: its key and a self-signed certificate whose
/// subject common name is the external account it speaks for
pub struct Authenticator {
    pub key: KeyPair,
    pub cert_pem: String,
}

impl Authenticator {
    pub fn new(account_identifier: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, account_identifier);
        let cert_pem = params.self_signed(&key).unwrap().pem();
        Self { key, cert_pem }
    }

    pub fn public_key_pem(&self) -> String {
        codec::public_key_pem(&self.key.public_key_der())
    }

    /// Base64 ECDSA signature over `message`
    pub fn sign(&self, message: &[u8]) -> String {
        let rng = SystemRandom::new();
        let signer = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_ASN1_SIGNING,
            &self.key.serialize_der(),
            &rng,
        )
        .unwrap();
        STANDARD.encode(signer.sign(&rng, message).unwrap().as_ref())
    }

    /// PEM CSR with subject `common_name` over the authenticator's own key
    pub fn csr(&self, common_name: &str) -> Vec<u8> {
        csr_for(&self.key, common_name, None)
    }
}

/// RSA authenticator loaded from the checked-in fixtures
pub struct RsaAuthenticator {
    key: RsaKeyPair,
    pub cert_pem: &'static str,
    pub public_key_pem: &'static str,
    /// PEM CSR, CN=alice
    pub alice_csr: &'static [u8],
}

impl RsaAuthenticator {
    pub fn load() -> Self {
        let key_pem = pem::parse(include_str!("../fixtures/rsa_authenticator.key.pem")).unwrap();
        Self {
            key: RsaKeyPair::from_pkcs8(key_pem.contents()).unwrap(),
            cert_pem: include_str!("../fixtures/rsa_authenticator.cert.pem"),
            public_key_pem: include_str!("../fixtures/rsa_authenticator.pub.pem"),
            alice_csr: include_bytes!("../fixtures/rsa_alice.csr.pem"),
        }
    }

    /// Base64 RSA PKCS#1 v1.5 SHA-256 signature over `message`
    pub fn sign(&self, message: &[u8]) -> String {
        let mut signature = vec![0u8; self.key.public().modulus_len()];
        self.key
            .sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), message, &mut signature)
            .unwrap();
        STANDARD.encode(signature)
    }
}

pub fn csr_for(key: &KeyPair, common_name: &str, email: Option<&str>) -> Vec<u8> {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    if let Some(email) = email {
        params.subject_alt_names = vec![SanType::Rfc822Name(email.try_into().unwrap())];
    }
    params
        .serialize_request(key)
        .unwrap()
        .pem()
        .unwrap()
        .into_bytes()
}

/// Create `username` and register the authenticator's key for it
pub async fn enrolled(service: &CaService, username: &str, authenticator: &Authenticator) {
    let account = service.accounts.create(username).await.unwrap();
    service
        .registry
        .register_key(account.id, authenticator.public_key_pem().as_bytes())
        .await
        .unwrap();
}

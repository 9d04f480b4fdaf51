//! Leaf and root certificate signing.
//!
//! The root key and certificate are loaded once at startup into a
//! [`RootAuthority`] and never change afterwards; the [`CertificateSigner`]
//! holding it is shared behind an `Arc` and used from the blocking pool.

use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::codec::{self, CertificateInfo, ParsedCsr, CSR_TAG};
use crate::types::{generate_random_bytes, CaError, Result};

/// Default lifetime of an account certificate
pub const ACCOUNT_CERT_VALID_DAYS: u32 = 10;

/// Default lifetime of a re-signed root certificate
pub const ROOT_CERT_VALID_DAYS: u32 = 365;

/// Subject fields of the self-signed root
#[derive(Debug, Clone)]
pub struct RootProfile {
    pub common_name: String,
    pub organization: String,
    pub contact_email: Option<String>,
    pub valid_days: u32,
}

impl Default for RootProfile {
    fn default() -> Self {
        Self {
            common_name: "letsauth.org".to_string(),
            organization: "Let's Authenticate".to_string(),
            contact_email: Some("admin@letsauth.org".to_string()),
            valid_days: ROOT_CERT_VALID_DAYS,
        }
    }
}

/// Root private key plus the certificate it signs as
pub struct RootAuthority {
    key: KeyPair,
    issuer: rcgen::Certificate,
    info: CertificateInfo,
}

impl RootAuthority {
    /// Build from a PKCS#8 PEM private key and a PEM root certificate.
    ///
    /// The certificate's public key must belong to the private key.
    pub fn from_pem(key_pem: &str, cert_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Config(format!("Invalid root private key: {e}")))?;

        let info = codec::parse_certificate(cert_pem.as_bytes())
            .map_err(|e| CaError::Config(format!("Invalid root certificate: {e}")))?;

        if info.public_key_der != key.public_key_der() {
            return Err(CaError::Config(
                "Root certificate does not match root private key".into(),
            ));
        }

        // rcgen needs the issuer as its own Certificate value; re-deriving it
        // from the parsed params keeps subject and key identifier intact.
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CaError::Config(format!("Unusable root certificate: {e}")))?;
        let issuer = params
            .self_signed(&key)
            .map_err(|e| CaError::Config(format!("Unusable root certificate: {e}")))?;

        Ok(Self { key, issuer, info })
    }

    /// Read root material from disk
    pub fn load(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let key_pem = read_root_key_pem(key_path)?;
        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
            CaError::Config(format!(
                "Cannot read root certificate {}: {e}",
                cert_path.display()
            ))
        })?;
        Self::from_pem(&key_pem, &cert_pem)
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// The root certificate as loaded
    pub fn certificate(&self) -> &CertificateInfo {
        &self.info
    }
}

impl std::fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootAuthority")
            .field("subject", &self.info.subject_cn)
            .field("not_after", &self.info.not_after)
            .finish_non_exhaustive()
    }
}

/// Output of a successful leaf signing
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub pem: String,
    pub info: CertificateInfo,
}

/// Signs account certificates with the root authority
#[derive(Debug)]
pub struct CertificateSigner {
    root: RootAuthority,
}

impl CertificateSigner {
    pub fn new(root: RootAuthority) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &RootAuthority {
        &self.root
    }

    /// Issue a non-CA client certificate for `username` over the CSR's key.
    pub fn sign_account_certificate(
        &self,
        csr: &ParsedCsr,
        username: &str,
        validity_days: u32,
    ) -> Result<SignedCertificate> {
        let mut request = CertificateSigningRequestParams::from_pem(&codec::armor(CSR_TAG, &csr.der))
            .map_err(|e| CaError::SigningFailure(format!("CSR rejected by signer: {e}")))?;

        let now = OffsetDateTime::now_utc();
        let mut params = CertificateParams::default();

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, username);
        params.distinguished_name = subject;

        params.subject_alt_names = csr
            .emails
            .iter()
            .map(|email| {
                Ia5String::try_from(email.as_str())
                    .map(SanType::Rfc822Name)
                    .map_err(|_| CaError::MalformedInput(format!("invalid email SAN {email}")))
            })
            .collect::<Result<Vec<_>>>()?;

        params.not_before = now;
        params.not_after = now + time::Duration::days(i64::from(validity_days));
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.key_identifier_method = KeyIdMethod::Sha256;
        params.use_authority_key_identifier_extension = true;

        request.params = params;

        let cert = request
            .signed_by(&self.root.issuer, &self.root.key)
            .map_err(|e| CaError::SigningFailure(e.to_string()))?;

        let pem = codec::pack_certificate_pem(cert.der());
        let info = codec::parse_certificate(cert.der())
            .map_err(|e| CaError::SigningFailure(format!("signed certificate unreadable: {e}")))?;

        debug!(username = %username, serial = %info.serial, "Signed account certificate");
        Ok(SignedCertificate { pem, info })
    }
}

fn read_root_key_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CaError::Config(format!("Cannot read root key {}: {e}", path.display())))
}

/// Load only the root private key, for re-signing the root certificate
pub fn load_root_key(path: &Path) -> Result<KeyPair> {
    KeyPair::from_pem(&read_root_key_pem(path)?)
        .map_err(|e| CaError::Config(format!("Invalid root private key: {e}")))
}

/// Produce a fresh self-signed root certificate PEM for `key`.
pub fn sign_root_certificate(key: &KeyPair, profile: &RootProfile) -> Result<String> {
    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::default();

    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, profile.common_name.as_str());
    subject.push(DnType::OrganizationName, profile.organization.as_str());
    params.distinguished_name = subject;

    if let Some(email) = &profile.contact_email {
        let email = Ia5String::try_from(email.as_str())
            .map_err(|_| CaError::Config(format!("invalid root contact email {email}")))?;
        params.subject_alt_names = vec![SanType::Rfc822Name(email)];
    }

    params.not_before = now;
    params.not_after = now + time::Duration::days(i64::from(profile.valid_days));
    params.serial_number = Some(random_serial());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::CrlSign,
    ];
    params.key_identifier_method = KeyIdMethod::Sha256;

    let cert = params.self_signed(key)?;
    info!(common_name = %profile.common_name, days = profile.valid_days, "Signed root certificate");
    Ok(codec::pack_certificate_pem(cert.der()))
}

/// 128 random bits, positive and with a fixed 16-byte DER length
fn random_serial() -> SerialNumber {
    let mut bytes = generate_random_bytes::<16>();
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from_slice(&bytes)
}

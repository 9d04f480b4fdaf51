//! PEM/DER handling for CSRs, certificates and public keys.
//!
//! Every input may arrive either armored (PEM) or raw (DER); the armor is
//! detected, never assumed. Public keys are compared in one canonical form:
//! a `PUBLIC KEY` PEM block around the SPKI DER, 64-column lines, LF endings.

use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::types::{CaError, Result};

pub const CERTIFICATE_TAG: &str = "CERTIFICATE";
pub const CSR_TAG: &str = "CERTIFICATE REQUEST";
pub const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// Tags accepted for a CSR block (older tooling still emits the NEW variant)
const CSR_TAGS: &[&str] = &[CSR_TAG, "NEW CERTIFICATE REQUEST"];

/// Wrap DER bytes in a PEM block with LF line endings.
pub fn armor(tag: &str, der: &[u8]) -> String {
    pem::encode_config(
        &Pem::new(tag, der.to_vec()),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}

/// Return the DER payload of `data`, unwrapping a PEM block if one is present.
///
/// When a block is found its tag must be one of `accepted_tags`.
pub fn unarmor(data: &[u8], accepted_tags: &[&str]) -> Result<Vec<u8>> {
    if !looks_armored(data) {
        return Ok(data.to_vec());
    }

    let block = pem::parse(data)?;
    if !accepted_tags.contains(&block.tag()) {
        return Err(CaError::MalformedInput(format!(
            "unexpected PEM block type {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

fn looks_armored(data: &[u8]) -> bool {
    data.windows(11).any(|w| w == b"-----BEGIN ")
}

/// Canonical PEM form of an SPKI public key
pub fn public_key_pem(spki_der: &[u8]) -> String {
    armor(PUBLIC_KEY_TAG, spki_der)
}

/// Re-encode a public key given as PEM (any line endings) or DER into the
/// canonical PEM form.
pub fn canonical_public_key_pem(data: &[u8]) -> Result<String> {
    let der = unarmor(data, &[PUBLIC_KEY_TAG])?;
    x509_parser::x509::SubjectPublicKeyInfo::from_der(&der)
        .map_err(|e| CaError::MalformedInput(format!("invalid public key: {e}")))?;
    Ok(public_key_pem(&der))
}

// =============================================================================
// Certificate Signing Requests
// =============================================================================

/// The parts of a CSR the authority cares about
#[derive(Debug, Clone)]
pub struct ParsedCsr {
    /// DER encoding of the whole request
    pub der: Vec<u8>,
    /// First subject common name, if any
    pub common_name: Option<String>,
    /// RFC 822 names from a requested subjectAltName extension
    pub emails: Vec<String>,
    /// SubjectPublicKeyInfo DER
    pub public_key_der: Vec<u8>,
}

impl ParsedCsr {
    pub fn public_key_pem(&self) -> String {
        public_key_pem(&self.public_key_der)
    }

    pub fn to_pem(&self) -> String {
        armor(CSR_TAG, &self.der)
    }
}

/// Parse a CSR given as PEM or DER and check its self-signature.
pub fn parse_csr(data: &[u8]) -> Result<ParsedCsr> {
    let der = unarmor(data, CSR_TAGS)?;

    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| CaError::MalformedInput(format!("CSR bad format: {e}")))?;

    csr.verify_signature()
        .map_err(|e| CaError::MalformedInput(format!("CSR signature invalid: {e}")))?;

    let info = &csr.certification_request_info;
    let common_name = info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let mut emails = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                emails.extend(san.general_names.iter().filter_map(|name| match name {
                    GeneralName::RFC822Name(email) => Some(email.to_string()),
                    _ => None,
                }));
            }
        }
    }

    let public_key_der = info.subject_pki.raw.to_vec();

    Ok(ParsedCsr {
        der,
        common_name,
        emails,
        public_key_der,
    })
}

// =============================================================================
// Certificates
// =============================================================================

/// Key usage bits relevant to account and root certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageFlags {
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
    pub client_auth: bool,
}

/// Decoded view of a certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Serial number, lowercase hex of the raw DER integer bytes
    pub serial: String,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub emails: Vec<String>,
    pub is_ca: bool,
    pub usage: UsageFlags,
    pub subject_key_id: Option<Vec<u8>>,
    pub authority_key_id: Option<Vec<u8>>,
    /// SubjectPublicKeyInfo DER
    pub public_key_der: Vec<u8>,
    /// DER encoding of the whole certificate
    pub der: Vec<u8>,
}

impl CertificateInfo {
    pub fn to_pem(&self) -> String {
        pack_certificate_pem(&self.der)
    }

    pub fn public_key_pem(&self) -> String {
        public_key_pem(&self.public_key_der)
    }
}

/// PEM `CERTIFICATE` block around DER bytes
pub fn pack_certificate_pem(der: &[u8]) -> String {
    armor(CERTIFICATE_TAG, der)
}

/// Parse a certificate given as PEM or DER.
pub fn parse_certificate(data: &[u8]) -> Result<CertificateInfo> {
    let der = unarmor(data, &[CERTIFICATE_TAG])?;

    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| CaError::MalformedInput(format!("invalid certificate: {e}")))?;

    let subject_cn = first_common_name(cert.subject());
    let issuer_cn = first_common_name(cert.issuer());

    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;

    let is_ca = cert
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);

    let mut usage = UsageFlags::default();
    if let Ok(Some(ku)) = cert.key_usage() {
        usage.digital_signature = ku.value.digital_signature();
        usage.key_encipherment = ku.value.key_encipherment();
        usage.key_cert_sign = ku.value.key_cert_sign();
    }
    if let Ok(Some(eku)) = cert.extended_key_usage() {
        usage.client_auth = eku.value.client_auth;
    }

    let mut emails = Vec::new();
    let mut subject_key_id = None;
    let mut authority_key_id = None;
    for extension in cert.extensions() {
        match extension.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                emails.extend(san.general_names.iter().filter_map(|name| match name {
                    GeneralName::RFC822Name(email) => Some(email.to_string()),
                    _ => None,
                }));
            }
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                subject_key_id = Some(ski.0.to_vec());
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                authority_key_id = aki.key_identifier.as_ref().map(|k| k.0.to_vec());
            }
            _ => {}
        }
    }

    Ok(CertificateInfo {
        serial: hex::encode(cert.raw_serial()),
        subject_cn,
        issuer_cn,
        not_before,
        not_after,
        emails,
        is_ca,
        usage,
        subject_key_id,
        authority_key_id,
        public_key_der: cert.public_key().raw.to_vec(),
        der: der.clone(),
    })
}

fn first_common_name(name: &x509_parser::x509::X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| CaError::MalformedInput(format!("certificate time out of range: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair, SanType};

    fn csr_for(cn: &str, email: Option<&str>) -> (KeyPair, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, cn);
        if let Some(email) = email {
            params.subject_alt_names = vec![SanType::Rfc822Name(email.try_into().unwrap())];
        }
        let csr = params.serialize_request(&key).unwrap();
        (key, csr.pem().unwrap())
    }

    #[test]
    fn test_parse_csr_pem_and_der() {
        let (_, pem_csr) = csr_for("alice", None);

        let from_pem = parse_csr(pem_csr.as_bytes()).unwrap();
        assert_eq!(from_pem.common_name.as_deref(), Some("alice"));

        let from_der = parse_csr(&from_pem.der).unwrap();
        assert_eq!(from_der.common_name.as_deref(), Some("alice"));
        assert_eq!(from_der.public_key_der, from_pem.public_key_der);
    }

    #[test]
    fn test_parse_csr_collects_emails() {
        let (_, pem_csr) = csr_for("alice", Some("alice@example.org"));
        let csr = parse_csr(pem_csr.as_bytes()).unwrap();
        assert_eq!(csr.emails, vec!["alice@example.org".to_string()]);
    }

    #[test]
    fn test_parse_csr_garbage_is_malformed() {
        let err = parse_csr(b"definitely not a csr").unwrap_err();
        assert!(matches!(err, CaError::MalformedInput(_)));

        let wrong_block = armor(CERTIFICATE_TAG, b"junk");
        let err = parse_csr(wrong_block.as_bytes()).unwrap_err();
        assert!(matches!(err, CaError::MalformedInput(_)));
    }

    #[test]
    fn test_canonical_public_key_is_stable() {
        let (_, pem_csr) = csr_for("alice", None);
        let csr = parse_csr(pem_csr.as_bytes()).unwrap();
        let canonical = csr.public_key_pem();

        assert!(canonical.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(!canonical.contains('\r'));

        // CRLF input and raw DER both normalise to the same text
        let crlf = canonical.replace('\n', "\r\n");
        assert_eq!(canonical_public_key_pem(crlf.as_bytes()).unwrap(), canonical);
        assert_eq!(
            canonical_public_key_pem(&csr.public_key_der).unwrap(),
            canonical
        );
    }

    #[test]
    fn test_certificate_roundtrip() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "roundtrip");
        let cert = params.self_signed(&key).unwrap();

        let info = parse_certificate(cert.pem().as_bytes()).unwrap();
        let repacked = parse_certificate(info.to_pem().as_bytes()).unwrap();

        assert_eq!(repacked.serial, info.serial);
        assert_eq!(repacked.subject_cn.as_deref(), Some("roundtrip"));
        assert_eq!(repacked.not_before, info.not_before);
        assert_eq!(repacked.not_after, info.not_after);
        assert_eq!(repacked.der, info.der);
        assert_eq!(repacked.der, cert.der().to_vec());
    }
}

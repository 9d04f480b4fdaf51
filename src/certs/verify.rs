//! Authenticator signature checks over raw CSR bytes

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_parser::oid_registry::{
    OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION, OID_SIG_ED25519,
};
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::x509::SubjectPublicKeyInfo;

use super::codec::{self, CERTIFICATE_TAG};
use crate::types::{CaError, Result};

/// Verify `base64_signature` over `message` using the public key embedded in
/// the authenticator certificate.
///
/// Bad base64 or an unparsable certificate is `MalformedInput`; a signature
/// that does not verify is `BadRequest`.
pub fn verify_with_certificate(
    authenticator_cert_pem: &str,
    message: &[u8],
    base64_signature: &str,
) -> Result<()> {
    let signature = STANDARD.decode(base64_signature.trim())?;

    let der = codec::unarmor(authenticator_cert_pem.as_bytes(), &[CERTIFICATE_TAG])?;
    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| {
        CaError::MalformedInput(format!("authenticator certificate invalid: {e}"))
    })?;

    let spki = cert.public_key();
    let algorithm = verification_algorithm(spki)?;

    UnparsedPublicKey::new(algorithm, spki.subject_public_key.data.as_ref())
        .verify(message, &signature)
        .map_err(|_| CaError::BadRequest("signature does not match authenticator key".into()))
}

fn verification_algorithm(
    spki: &SubjectPublicKeyInfo<'_>,
) -> Result<&'static dyn VerificationAlgorithm> {
    let oid = &spki.algorithm.algorithm;

    if *oid == OID_PKCS1_RSAENCRYPTION {
        return Ok(&signature::RSA_PKCS1_2048_8192_SHA256);
    }
    if *oid == OID_SIG_ED25519 {
        return Ok(&signature::ED25519);
    }
    if *oid == OID_KEY_TYPE_EC_PUBLIC_KEY {
        // Uncompressed SEC1 point: 0x04 || X || Y
        return match spki.subject_public_key.data.len() {
            65 => Ok(&signature::ECDSA_P256_SHA256_ASN1),
            97 => Ok(&signature::ECDSA_P384_SHA384_ASN1),
            n => Err(CaError::MalformedInput(format!(
                "unsupported EC public key length {n}"
            ))),
        };
    }

    Err(CaError::MalformedInput(format!(
        "unsupported authenticator key algorithm {}",
        oid.to_id_string()
    )))
}

//! Certificate handling
//!
//! - `codec`: PEM/DER detection, CSR and certificate parsing, canonical key PEM
//! - `verify`: authenticator signatures over CSR bytes
//! - `signer`: account (leaf) and root certificate signing

pub mod codec;
pub mod signer;
pub mod verify;

pub use codec::{
    canonical_public_key_pem, pack_certificate_pem, parse_certificate, parse_csr,
    CertificateInfo, ParsedCsr,
};
pub use signer::{
    load_root_key, sign_root_certificate, CertificateSigner, RootAuthority, RootProfile,
    SignedCertificate, ACCOUNT_CERT_VALID_DAYS, ROOT_CERT_VALID_DAYS,
};
pub use verify::verify_with_certificate;

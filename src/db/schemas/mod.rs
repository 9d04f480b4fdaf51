//! Database schemas for Lintel
//!
//! One document type per stored entity. Binary values are stored as base64
//! strings, certificates and keys as PEM, account ids as UUID strings.

mod account;
mod authenticator_key;
mod ceremony_session;
mod certificate;
mod claim;
mod metadata;
mod vault;

pub use account::{AccountDoc, CredentialDoc, ACCOUNT_COLLECTION};
pub use authenticator_key::{AuthenticatorKeyDoc, AUTHENTICATOR_KEY_COLLECTION};
pub use ceremony_session::{CeremonySessionDoc, SESSION_COLLECTION};
pub use certificate::{CertificateDoc, CERTIFICATE_COLLECTION};
pub use claim::{AccountClaimDoc, CLAIM_COLLECTION};
pub use metadata::Metadata;
pub use vault::{VaultDoc, VaultLockDoc, VAULT_COLLECTION};

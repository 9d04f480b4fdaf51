//! Lintel - account certificate authority
//!
//! Issues short-lived client certificates to accounts. A request is honoured
//! only when it is signed by an authenticator key registered to the account,
//! and each issuance claims the authenticator's external account for the
//! requesting user.
//!
//! ## Components
//!
//! - **Accounts**: usernames, display names and ceremony credentials
//! - **Registry**: authenticator keys authorized per account
//! - **Claims**: first-writer-wins binding of external accounts to users
//! - **Certs**: CSR/certificate codecs, signature checks, root and leaf signing
//! - **Issuance**: the authorize-and-issue pipeline
//! - **Sessions**: one-time ceremony state and identity sessions
//! - **Vault**: exclusive, expiring locks over per-account recovery blobs
//! - **Enrollment**: registration and login ceremonies over a pluggable provider

pub mod accounts;
pub mod certs;
pub mod claims;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod issuance;
pub mod logging;
pub mod registry;
pub mod service;
pub mod sessions;
pub mod store;
pub mod types;
pub mod vault;
pub mod version;

pub use config::Args;
pub use service::{spawn_sweeper, CaService, ServiceSettings, SweepReport};
pub use types::{CaError, Result};

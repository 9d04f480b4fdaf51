//! Configuration for Lintel
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::certs::{RootProfile, ACCOUNT_CERT_VALID_DAYS, ROOT_CERT_VALID_DAYS};
use crate::enrollment::RelyingParty;
use crate::sessions::SessionKey;
use crate::types::Result;

/// Upper bound for session and lock TTLs (one week)
pub const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

/// Lintel - account certificate authority
///
/// Issues short-lived client certificates to accounts whose authenticator
/// key is registered, and records which account owns each external identity.
#[derive(Parser, Debug, Clone)]
#[command(name = "lintel")]
#[command(about = "Account certificate authority bound to authenticator keys")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable development mode (in-memory storage, generated session key)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "lintel")]
    pub mongodb_db: String,

    /// Root CA configuration
    #[command(flatten)]
    pub root: RootArgs,

    /// Validity of issued account certificates in days
    #[arg(long, env = "ACCOUNT_CERT_DAYS", default_value_t = ACCOUNT_CERT_VALID_DAYS)]
    pub account_cert_days: u32,

    /// Domain appended to usernames to form display names
    #[arg(long, env = "DISPLAY_DOMAIN", default_value = crate::accounts::DEFAULT_DISPLAY_DOMAIN)]
    pub display_domain: String,

    /// Lifetime of a registration or login ceremony session
    #[arg(long, env = "CEREMONY_TTL_SECS", default_value = "30")]
    pub ceremony_ttl_secs: u64,

    /// Lifetime of an identity (logged-in) session
    #[arg(long, env = "IDENTITY_TTL_SECS", default_value = "30")]
    pub identity_ttl_secs: u64,

    /// Lifetime of a vault lock
    #[arg(long, env = "VAULT_LOCK_TTL_SECS", default_value = "30")]
    pub vault_lock_ttl_secs: u64,

    /// Interval of the background expiry sweeper (0 disables it)
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "60")]
    pub sweep_interval_secs: u64,

    /// Session carrier encryption key, 64 hex chars (required in production)
    #[arg(long, env = "SESSION_KEY", hide_env_values = true)]
    pub session_key: Option<String>,

    /// Relying party passed to the ceremony provider
    #[command(flatten)]
    pub rp: RelyingPartyArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Append audit events as JSONL to this file
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
}

/// Maintenance commands; without one the authority runs its sweeper
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Re-sign the root certificate from the root key and write it as PEM
    ResignRoot {
        /// Output path (defaults to --root-cert)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load the root material and print its subject and expiry
    Check,
    /// Purge expired sessions and vault locks once, then exit
    Sweep,
    /// Print build information
    Version,
}

/// Root key pair and certificate subject
#[derive(Parser, Debug, Clone)]
pub struct RootArgs {
    /// PKCS#8 PEM private key of the root
    #[arg(long = "root-key", env = "ROOT_KEY_FILE", default_value = "root.key")]
    pub key: PathBuf,

    /// PEM root certificate
    #[arg(long = "root-cert", env = "ROOT_CERT_FILE", default_value = "root.pem")]
    pub cert: PathBuf,

    /// Validity of a re-signed root certificate in days
    #[arg(long = "root-cert-days", env = "ROOT_CERT_DAYS", default_value_t = ROOT_CERT_VALID_DAYS)]
    pub valid_days: u32,

    #[arg(long = "root-common-name", env = "ROOT_COMMON_NAME", default_value = "letsauth.org")]
    pub common_name: String,

    #[arg(long = "root-organization", env = "ROOT_ORGANIZATION", default_value = "Let's Authenticate")]
    pub organization: String,

    #[arg(long = "root-email", env = "ROOT_EMAIL", default_value = "admin@letsauth.org")]
    pub email: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RelyingPartyArgs {
    #[arg(long = "rp-id", env = "RP_ID", default_value = "localhost")]
    pub id: String,

    #[arg(long = "rp-origin", env = "RP_ORIGIN", default_value = "http://localhost:8080")]
    pub origin: String,

    #[arg(long = "rp-display-name", env = "RP_DISPLAY_NAME", default_value = "Let's Authenticate")]
    pub display_name: String,
}

impl Args {
    /// Session carrier key. Dev mode may run without one; a fresh key then
    /// invalidates all carriers on restart.
    pub fn session_key(&self) -> Result<SessionKey> {
        match &self.session_key {
            Some(hex_key) => SessionKey::from_hex(hex_key),
            None if self.dev_mode => {
                warn!("SESSION_KEY not set, generating an ephemeral key (dev mode)");
                Ok(SessionKey::generate())
            }
            None => Err(crate::types::CaError::Config(
                "SESSION_KEY is required in production mode".into(),
            )),
        }
    }

    pub fn ceremony_ttl(&self) -> Duration {
        Duration::from_secs(self.ceremony_ttl_secs)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_secs)
    }

    pub fn vault_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.vault_lock_ttl_secs)
    }

    /// Sweeper interval, `None` when disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn root_profile(&self) -> RootProfile {
        RootProfile {
            common_name: self.root.common_name.clone(),
            organization: self.root.organization.clone(),
            contact_email: Some(self.root.email.clone()).filter(|e| !e.is_empty()),
            valid_days: self.root.valid_days,
        }
    }

    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty {
            id: self.rp.id.clone(),
            origin: self.rp.origin.clone(),
            display_name: self.rp.display_name.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.dev_mode {
            match &self.session_key {
                None => return Err("SESSION_KEY is required in production mode".to_string()),
                Some(key) if key.len() != 64 || hex::decode(key).is_err() => {
                    return Err("SESSION_KEY must be 64 hex characters".to_string())
                }
                Some(_) => {}
            }
        }

        if self.account_cert_days == 0 {
            return Err("ACCOUNT_CERT_DAYS must be at least 1".to_string());
        }

        if self.root.valid_days == 0 {
            return Err("ROOT_CERT_DAYS must be at least 1".to_string());
        }

        let ttls = [
            self.ceremony_ttl_secs,
            self.identity_ttl_secs,
            self.vault_lock_ttl_secs,
        ];
        if ttls.contains(&0) {
            return Err("Session and lock TTLs must be at least 1 second".to_string());
        }
        if ttls.iter().any(|&ttl| ttl > MAX_TTL_SECS) {
            return Err(format!(
                "Session and lock TTLs must not exceed {MAX_TTL_SECS} seconds"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["lintel"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--dev-mode"]);
        assert_eq!(args.account_cert_days, 10);
        assert_eq!(args.root.valid_days, 365);
        assert_eq!(args.ceremony_ttl(), Duration::from_secs(30));
        assert_eq!(args.vault_lock_ttl(), Duration::from_secs(30));
        assert_eq!(args.root_profile().common_name, "letsauth.org");
        assert!(args.command.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_session_key() {
        let args = parse(&[]);
        if args.session_key.is_none() {
            assert!(args.validate().is_err());
            assert!(args.session_key().is_err());
        }

        let args = parse(&["--session-key", KEY]);
        assert!(args.validate().is_ok());
        assert!(args.session_key().is_ok());

        let args = parse(&["--session-key", "abcd"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_subcommands() {
        let args = parse(&["--dev-mode", "resign-root", "--out", "new-root.pem"]);
        assert_eq!(
            args.command,
            Some(Command::ResignRoot {
                out: Some(PathBuf::from("new-root.pem"))
            })
        );
        assert_eq!(parse(&["sweep"]).command, Some(Command::Sweep));
    }

    #[test]
    fn test_sweep_interval_zero_disables() {
        let args = parse(&["--dev-mode", "--sweep-interval-secs", "0"]);
        assert!(args.sweep_interval().is_none());
    }

    #[test]
    fn test_ttls_are_bounded() {
        let huge = u64::MAX.to_string();
        for flag in ["--ceremony-ttl-secs", "--identity-ttl-secs", "--vault-lock-ttl-secs"] {
            assert!(parse(&["--dev-mode", flag, &huge]).validate().is_err(), "{flag}");
            assert!(parse(&["--dev-mode", flag, "0"]).validate().is_err(), "{flag}");
        }

        let week = MAX_TTL_SECS.to_string();
        assert!(parse(&["--dev-mode", "--vault-lock-ttl-secs", &week])
            .validate()
            .is_ok());
    }
}

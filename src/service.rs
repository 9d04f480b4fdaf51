//! Service assembly
//!
//! `CaService` owns one instance of every component, all sharing a single
//! storage backend, the root authority and the audit log. Nothing is global;
//! embedders build one service and clone it where needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accounts::{AccountDirectory, DEFAULT_DISPLAY_DOMAIN};
use crate::certs::{CertificateSigner, RootAuthority, ACCOUNT_CERT_VALID_DAYS};
use crate::claims::AccountClaimLedger;
use crate::config::Args;
use crate::db::MongoClient;
use crate::enrollment::{CeremonyProvider, EnrollmentCoordinator};
use crate::issuance::IssuanceOrchestrator;
use crate::logging::AuditLog;
use crate::registry::AuthenticatorKeyRegistry;
use crate::sessions::{CeremonySessionStore, SessionKey, DEFAULT_CEREMONY_TTL, DEFAULT_IDENTITY_TTL};
use crate::store::{MemoryStore, MongoStore, Store};
use crate::types::Result;
use crate::vault::{VaultLockManager, DEFAULT_LOCK_TTL};

/// Tunables shared by the components
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub display_domain: String,
    pub account_cert_days: u32,
    pub ceremony_ttl: Duration,
    pub identity_ttl: Duration,
    pub vault_lock_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            display_domain: DEFAULT_DISPLAY_DOMAIN.to_string(),
            account_cert_days: ACCOUNT_CERT_VALID_DAYS,
            ceremony_ttl: DEFAULT_CEREMONY_TTL,
            identity_ttl: DEFAULT_IDENTITY_TTL,
            vault_lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

impl ServiceSettings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            display_domain: args.display_domain.clone(),
            account_cert_days: args.account_cert_days,
            ceremony_ttl: args.ceremony_ttl(),
            identity_ttl: args.identity_ttl(),
            vault_lock_ttl: args.vault_lock_ttl(),
        }
    }
}

/// Counts from one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub locks: usize,
}

#[derive(Clone)]
pub struct CaService {
    pub accounts: AccountDirectory,
    pub registry: AuthenticatorKeyRegistry,
    pub ledger: AccountClaimLedger,
    pub sessions: CeremonySessionStore,
    pub vault: VaultLockManager,
    pub issuance: IssuanceOrchestrator,
    pub signer: Arc<CertificateSigner>,
    pub audit: AuditLog,
}

impl CaService {
    /// Build from configuration: load root material, open the audit log and
    /// connect the storage backend (memory in dev mode, MongoDB otherwise).
    pub async fn build(args: &Args) -> Result<Self> {
        let root = RootAuthority::load(&args.root.key, &args.root.cert)?;
        info!(
            subject = ?root.certificate().subject_cn,
            not_after = %root.certificate().not_after,
            "Root authority loaded"
        );

        let session_key = args.session_key()?;

        let audit = AuditLog::disabled();
        if let Some(path) = &args.audit_log {
            audit.init_file(path.clone()).await?;
            info!("Audit log: {}", path.display());
        }

        let settings = ServiceSettings::from_args(args);

        if args.dev_mode {
            warn!("Development mode: using in-memory storage");
            Ok(Self::assemble(
                Arc::new(MemoryStore::default()),
                root,
                session_key,
                settings,
                audit,
            ))
        } else {
            let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            let store = MongoStore::new(&mongo).await?;
            Ok(Self::assemble(
                Arc::new(store),
                root,
                session_key,
                settings,
                audit,
            ))
        }
    }

    /// Memory-backed service with default settings and no audit file
    pub fn in_memory(root: RootAuthority, session_key: SessionKey) -> Self {
        Self::assemble(
            Arc::new(MemoryStore::default()),
            root,
            session_key,
            ServiceSettings::default(),
            AuditLog::disabled(),
        )
    }

    /// Wire every component to `store`
    pub fn assemble<S: Store + 'static>(
        store: Arc<S>,
        root: RootAuthority,
        session_key: SessionKey,
        settings: ServiceSettings,
        audit: AuditLog,
    ) -> Self {
        let accounts = AccountDirectory::new(store.clone(), settings.display_domain);
        let registry = AuthenticatorKeyRegistry::new(store.clone(), audit.clone());
        let ledger = AccountClaimLedger::new(store.clone(), audit.clone());
        let sessions = CeremonySessionStore::new(
            store.clone(),
            session_key,
            settings.ceremony_ttl,
            settings.identity_ttl,
        );
        let vault = VaultLockManager::new(store.clone(), settings.vault_lock_ttl, audit.clone());
        let signer = Arc::new(CertificateSigner::new(root));
        let issuance = IssuanceOrchestrator::new(
            accounts.clone(),
            registry.clone(),
            ledger.clone(),
            signer.clone(),
            store,
            settings.account_cert_days,
            audit.clone(),
        );

        Self {
            accounts,
            registry,
            ledger,
            sessions,
            vault,
            issuance,
            signer,
            audit,
        }
    }

    /// Registration and login flows driven by `provider`
    pub fn enrollment(&self, provider: Arc<dyn CeremonyProvider>) -> EnrollmentCoordinator {
        EnrollmentCoordinator::new(
            self.accounts.clone(),
            self.registry.clone(),
            self.sessions.clone(),
            provider,
        )
    }

    /// Drop expired sessions and clear expired vault locks
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let report = SweepReport {
            sessions: self.sessions.purge_expired().await?,
            locks: self.vault.sweep_expired().await?,
        };
        if report != SweepReport::default() {
            debug!(
                "Sweep removed {} sessions and {} vault locks",
                report.sessions, report.locks
            );
        }
        Ok(report)
    }
}

/// Spawn the periodic expiry sweeper
pub fn spawn_sweeper(service: CaService, interval: Duration) -> JoinHandle<()> {
    info!("Expiry sweeper started ({}s interval)", interval.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep_once().await {
                warn!("Expiry sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::{sign_root_certificate, RootProfile};
    use rcgen::KeyPair;

    fn service_with(settings: ServiceSettings) -> CaService {
        let key = KeyPair::generate().unwrap();
        let cert = sign_root_certificate(&key, &RootProfile::default()).unwrap();
        let root = RootAuthority::from_pem(&key.serialize_pem(), &cert).unwrap();
        CaService::assemble(
            Arc::new(MemoryStore::default()),
            root,
            SessionKey::generate(),
            settings,
            AuditLog::disabled(),
        )
    }

    #[tokio::test]
    async fn test_components_share_store() {
        let service = service_with(ServiceSettings::default());
        let account = service.accounts.create("alice").await.unwrap();

        let lock = service.vault.acquire_lock(account.id).await.unwrap();
        service
            .vault
            .write_vault(account.id, lock, b"blob")
            .await
            .unwrap();

        let (data, _) = service.vault.read_vault(account.id).await.unwrap().unwrap();
        assert_eq!(data, b"blob");
        assert!(service
            .issuance
            .current_certificate("alice")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sweep_once() {
        let service = service_with(ServiceSettings {
            identity_ttl: Duration::from_millis(50),
            vault_lock_ttl: Duration::from_millis(50),
            ..ServiceSettings::default()
        });
        let account = service.accounts.create("alice").await.unwrap();

        service.sessions.save_identity("alice").await.unwrap();
        service.vault.acquire_lock(account.id).await.unwrap();

        assert_eq!(service.sweep_once().await.unwrap(), SweepReport::default());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            service.sweep_once().await.unwrap(),
            SweepReport {
                sessions: 1,
                locks: 1
            }
        );
    }
}

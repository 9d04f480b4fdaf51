//! Certificate issuance
//!
//! Turns a CSR into an account certificate once every check has passed:
//!
//! 1. the username names an existing account
//! 2. the CSR parses and its self-signature holds
//! 3. the CSR key is registered for that account
//! 4. the CSR subject is the username
//! 5. the authenticator certificate's key signed the raw CSR bytes
//!
//! Signing runs on the blocking pool. The account identifier asserted by a
//! certificate subject is then claimed for the username, in the ledger
//! namespace of the certificate it came from, and the certificate is stored. A failure after signing leaves nothing half-written that a
//! retry cannot repair: claims are idempotent and re-issuance is cheap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::accounts::AccountDirectory;
use crate::certs::{
    pack_certificate_pem, parse_certificate, parse_csr, verify_with_certificate,
    CertificateSigner, SignedCertificate,
};
use crate::claims::{AccountClaimLedger, ClaimSource};
use crate::logging::{AuditEvent, AuditKind, AuditLog};
use crate::registry::AuthenticatorKeyRegistry;
use crate::store::CertificateStore;
use crate::types::{AccountId, CaError, ExternalAccountId, Result};

/// A certificate the authority has issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Lowercase hex serial
    pub serial: String,
    pub account_id: AccountId,
    pub username: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub der: Vec<u8>,
    /// Authenticator certificate that authorized this issuance
    pub authenticator_cert_pem: String,
    /// Canonical PEM of the certified key
    pub public_key_pem: String,
    pub issued_at: DateTime<Utc>,
}

impl IssuedCertificate {
    pub fn pem(&self) -> String {
        pack_certificate_pem(&self.der)
    }
}

#[derive(Clone)]
pub struct IssuanceOrchestrator {
    accounts: AccountDirectory,
    registry: AuthenticatorKeyRegistry,
    ledger: AccountClaimLedger,
    signer: Arc<CertificateSigner>,
    certificates: Arc<dyn CertificateStore>,
    validity_days: u32,
    audit: AuditLog,
}

impl IssuanceOrchestrator {
    pub fn new(
        accounts: AccountDirectory,
        registry: AuthenticatorKeyRegistry,
        ledger: AccountClaimLedger,
        signer: Arc<CertificateSigner>,
        certificates: Arc<dyn CertificateStore>,
        validity_days: u32,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            registry,
            ledger,
            signer,
            certificates,
            validity_days,
            audit,
        }
    }

    /// Issue a certificate for `username` and claim its subject.
    pub async fn authorize_and_issue(
        &self,
        username: &str,
        csr: &[u8],
        signature: &str,
        authenticator_cert_pem: &str,
    ) -> Result<IssuedCertificate> {
        self.issue(
            username,
            csr,
            signature,
            authenticator_cert_pem,
            ClaimSource::IssuedCertificate,
        )
        .await
    }

    /// Issue a certificate and bind the account named by the authenticator
    /// certificate's subject to `username`.
    pub async fn bind_account(
        &self,
        username: &str,
        csr: &[u8],
        signature: &str,
        authenticator_cert_pem: &str,
    ) -> Result<IssuedCertificate> {
        self.issue(
            username,
            csr,
            signature,
            authenticator_cert_pem,
            ClaimSource::AuthenticatorCertificate,
        )
        .await
    }

    /// Newest certificate issued to `username`
    pub async fn current_certificate(&self, username: &str) -> Result<Option<IssuedCertificate>> {
        let Some(account) = self.accounts.find_by_username(username).await? else {
            return Ok(None);
        };
        let certificates = self.certificates.list_certificates(account.id).await?;
        Ok(certificates.into_iter().max_by_key(|c| c.issued_at))
    }

    async fn issue(
        &self,
        username: &str,
        csr_bytes: &[u8],
        signature: &str,
        authenticator_cert_pem: &str,
        source: ClaimSource,
    ) -> Result<IssuedCertificate> {
        let result = self
            .try_issue(username, csr_bytes, signature, authenticator_cert_pem, source)
            .await;

        if let Err(ref e) = result {
            warn!(username = %username, error = %e, "Issuance rejected");
            self.audit
                .log(
                    AuditEvent::new(AuditKind::IssuanceRejected)
                        .with_username(username)
                        .with_reason(e.kind()),
                )
                .await;
        }
        result
    }

    async fn try_issue(
        &self,
        username: &str,
        csr_bytes: &[u8],
        signature: &str,
        authenticator_cert_pem: &str,
        source: ClaimSource,
    ) -> Result<IssuedCertificate> {
        let account = self
            .accounts
            .find_by_username(username)
            .await?
            .ok_or_else(|| CaError::Unauthorized("unknown account".into()))?;

        let csr = parse_csr(csr_bytes)?;
        let key_pem = csr.public_key_pem();

        if !self.registry.is_authorized(account.id, &key_pem).await? {
            return Err(CaError::Unauthorized(
                "key not registered for this account".into(),
            ));
        }

        if csr.common_name.as_deref() != Some(username) {
            return Err(CaError::BadRequest(
                "username doesn't match CSR subject".into(),
            ));
        }

        verify_with_certificate(authenticator_cert_pem, csr_bytes, signature)?;

        // The authenticator subject is read before signing so a certificate
        // without one never gets a leaf issued
        let authenticator_subject = match source {
            ClaimSource::AuthenticatorCertificate => Some(subject_of(authenticator_cert_pem)?),
            ClaimSource::IssuedCertificate => None,
        };

        let signed = self.sign(csr, username).await?;

        let claimed = match authenticator_subject {
            Some(subject) => subject,
            None => ExternalAccountId::new(signed.info.subject_cn.clone().unwrap_or_default())?,
        };
        self.ledger.claim(source, &claimed, username).await?;

        let issued = IssuedCertificate {
            serial: signed.info.serial.clone(),
            account_id: account.id,
            username: username.to_string(),
            not_before: signed.info.not_before,
            not_after: signed.info.not_after,
            der: signed.info.der.clone(),
            authenticator_cert_pem: authenticator_cert_pem.to_string(),
            public_key_pem: key_pem,
            issued_at: Utc::now(),
        };
        self.certificates.insert_certificate(&issued).await?;

        info!(
            username = %username,
            serial = %issued.serial,
            not_after = %issued.not_after,
            "Certificate issued"
        );
        self.audit
            .log(
                AuditEvent::new(AuditKind::CertificateIssued)
                    .with_username(username)
                    .with_account_id(account.id)
                    .with_subject(&issued.serial),
            )
            .await;

        Ok(issued)
    }

    async fn sign(
        &self,
        csr: crate::certs::ParsedCsr,
        username: &str,
    ) -> Result<SignedCertificate> {
        let signer = Arc::clone(&self.signer);
        let username = username.to_string();
        let validity_days = self.validity_days;

        debug!(username = %username, validity_days, "Dispatching certificate signing");
        tokio::task::spawn_blocking(move || {
            signer.sign_account_certificate(&csr, &username, validity_days)
        })
        .await
        .map_err(|e| CaError::Internal(format!("Signing task failed: {e}")))?
    }
}

/// Account identifier named by a certificate's subject common name
fn subject_of(cert_pem: &str) -> Result<ExternalAccountId> {
    let info = parse_certificate(cert_pem.as_bytes())?;
    let cn = info.subject_cn.ok_or_else(|| {
        CaError::BadRequest("authenticator certificate has no subject common name".into())
    })?;
    ExternalAccountId::new(cn)
}

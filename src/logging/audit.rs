//! Audit trail for issuance, claims, keys and vault locks
//!
//! Events are written as JSONL to an optional file and always mirrored to
//! `tracing` under the `audit` target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::types::AccountId;

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CertificateIssued,
    IssuanceRejected,
    ClaimRecorded,
    ClaimRejected,
    KeyRegistered,
    KeyRevoked,
    LockAcquired,
    LockReleased,
    LockExpired,
    VaultWritten,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CertificateIssued => "certificate_issued",
            Self::IssuanceRejected => "issuance_rejected",
            Self::ClaimRecorded => "claim_recorded",
            Self::ClaimRejected => "claim_rejected",
            Self::KeyRegistered => "key_registered",
            Self::KeyRevoked => "key_revoked",
            Self::LockAcquired => "lock_acquired",
            Self::LockReleased => "lock_released",
            Self::LockExpired => "lock_expired",
            Self::VaultWritten => "vault_written",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Certificate serial, claimed identifier or vault version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Error kind for rejections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            username: None,
            account_id: None,
            subject: None,
            reason: None,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_account_id(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn with_subject(mut self, subject: impl ToString) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Shared audit sink; cloning shares the same file
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditLogInner>>,
}

struct AuditLogInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Audit log that only mirrors to `tracing`
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditLogInner {
                writer: None,
                path: None,
            })),
        }
    }

    /// Start appending JSONL events to `path`
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AuditEvent) {
        info!(
            target: "audit",
            kind = event.kind.as_str(),
            username = event.username.as_deref().unwrap_or(""),
            account_id = event.account_id.as_deref().unwrap_or(""),
            subject = event.subject.as_deref().unwrap_or(""),
            reason = event.reason.as_deref().unwrap_or(""),
        );

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::disabled()
    }
}

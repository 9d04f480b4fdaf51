//! Recovery vault document schema
//!
//! Data, version and the current lock live in one document per account so
//! that every lock transition and locked write is a single-document update.

use base64::{engine::general_purpose::STANDARD, Engine};
use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{AccountId, CaError, LockToken, Result};
use crate::vault::{VaultLock, VaultRecord};

pub const VAULT_COLLECTION: &str = "vaults";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct VaultDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub account_id: String,

    /// Opaque encrypted blob, base64
    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub version: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<VaultLockDoc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VaultLockDoc {
    pub token: String,
    pub acquired_at: DateTime,
    pub expires_at: DateTime,
}

impl VaultLockDoc {
    pub fn to_document(lock: &VaultLock) -> Document {
        doc! {
            "token": lock.token.to_string(),
            "acquired_at": DateTime::from_chrono(lock.acquired_at),
            "expires_at": DateTime::from_chrono(lock.expires_at),
        }
    }
}

impl TryFrom<VaultLockDoc> for VaultLock {
    type Error = CaError;

    fn try_from(doc: VaultLockDoc) -> Result<Self> {
        Ok(Self {
            token: LockToken::parse(&doc.token)
                .map_err(|e| CaError::Database(format!("Corrupt vault lock: {e}")))?,
            acquired_at: doc.acquired_at.to_chrono(),
            expires_at: doc.expires_at.to_chrono(),
        })
    }
}

impl TryFrom<VaultDoc> for VaultRecord {
    type Error = CaError;

    fn try_from(doc: VaultDoc) -> Result<Self> {
        Ok(Self {
            account_id: AccountId::parse(&doc.account_id)?,
            data: STANDARD
                .decode(&doc.data)
                .map_err(|e| CaError::Database(format!("Corrupt vault data: {e}")))?,
            version: u64::try_from(doc.version).unwrap_or_default(),
            lock: doc.lock.map(VaultLock::try_from).transpose()?,
        })
    }
}

impl IntoIndexes for VaultDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "account_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("account_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "lock.expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .sparse(true)
                        .name("lock_expiry_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for VaultDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

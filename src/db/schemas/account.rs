//! Account document schema
//!
//! Accounts embed their WebAuthn credential records.

use base64::{engine::general_purpose::STANDARD, Engine};
use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::accounts::{Account, CredentialRecord};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{AccountId, CaError, Result};

pub const ACCOUNT_COLLECTION: &str = "accounts";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Internal account id (UUID string)
    pub account_id: String,

    pub username: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(default)]
    pub credentials: Vec<CredentialDoc>,
}

/// Credential record with binary fields base64-encoded
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CredentialDoc {
    pub credential_id: String,
    pub public_key: String,
    #[serde(default)]
    pub aaguid: String,
    #[serde(default)]
    pub sign_count: i64,
    #[serde(default)]
    pub clone_warning: bool,
}

impl From<&CredentialRecord> for CredentialDoc {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            credential_id: STANDARD.encode(&record.credential_id),
            public_key: STANDARD.encode(&record.public_key),
            aaguid: STANDARD.encode(&record.aaguid),
            sign_count: i64::from(record.sign_count),
            clone_warning: record.clone_warning,
        }
    }
}

impl TryFrom<CredentialDoc> for CredentialRecord {
    type Error = CaError;

    fn try_from(doc: CredentialDoc) -> Result<Self> {
        let stored = |e: base64::DecodeError| CaError::Database(format!("Corrupt credential: {e}"));
        Ok(Self {
            credential_id: STANDARD.decode(&doc.credential_id).map_err(stored)?,
            public_key: STANDARD.decode(&doc.public_key).map_err(stored)?,
            aaguid: STANDARD.decode(&doc.aaguid).map_err(stored)?,
            sign_count: u32::try_from(doc.sign_count).unwrap_or(u32::MAX),
            clone_warning: doc.clone_warning,
        })
    }
}

impl From<&Account> for AccountDoc {
    fn from(account: &Account) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            account_id: account.id.to_string(),
            username: account.username.clone(),
            display_name: account.display_name.clone(),
            created_at: Some(DateTime::from_chrono(account.created_at)),
            credentials: account.credentials.iter().map(CredentialDoc::from).collect(),
        }
    }
}

impl TryFrom<AccountDoc> for Account {
    type Error = CaError;

    fn try_from(doc: AccountDoc) -> Result<Self> {
        Ok(Self {
            id: AccountId::parse(&doc.account_id)?,
            username: doc.username,
            display_name: doc.display_name,
            created_at: doc.created_at.map(|t| t.to_chrono()).unwrap_or_default(),
            credentials: doc
                .credentials
                .into_iter()
                .map(CredentialRecord::try_from)
                .collect::<Result<_>>()?,
        })
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("username_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "account_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("account_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_doc_conversion() {
        let mut account = Account::new("alice", "letsauth.org");
        account.credentials.push(CredentialRecord {
            credential_id: vec![1, 2, 3],
            public_key: vec![4, 5],
            aaguid: vec![0; 16],
            sign_count: 7,
            clone_warning: false,
        });

        let doc = AccountDoc::from(&account);
        assert_eq!(doc.credentials[0].credential_id, "AQID");

        let back = Account::try_from(doc).unwrap();
        assert_eq!(back.id, account.id);
        assert_eq!(back.credentials, account.credentials);
    }
}

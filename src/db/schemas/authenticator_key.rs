//! Authenticator key document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::registry::AuthenticatorKey;
use crate::types::{AccountId, CaError, Result};

pub const AUTHENTICATOR_KEY_COLLECTION: &str = "authenticator_keys";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AuthenticatorKeyDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub account_id: String,

    /// Canonical `PUBLIC KEY` PEM
    pub key_pem: String,
}

impl From<&AuthenticatorKey> for AuthenticatorKeyDoc {
    fn from(key: &AuthenticatorKey) -> Self {
        let mut metadata = Metadata::new();
        metadata.created_at = Some(bson::DateTime::from_chrono(key.created_at));
        Self {
            _id: None,
            metadata,
            account_id: key.account_id.to_string(),
            key_pem: key.key_pem.clone(),
        }
    }
}

impl TryFrom<AuthenticatorKeyDoc> for AuthenticatorKey {
    type Error = CaError;

    fn try_from(doc: AuthenticatorKeyDoc) -> Result<Self> {
        Ok(Self {
            account_id: AccountId::parse(&doc.account_id)?,
            key_pem: doc.key_pem,
            created_at: doc
                .metadata
                .created_at
                .map(|t| t.to_chrono())
                .unwrap_or_default(),
        })
    }
}

impl IntoIndexes for AuthenticatorKeyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "account_id": 1, "key_pem": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("account_key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AuthenticatorKeyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

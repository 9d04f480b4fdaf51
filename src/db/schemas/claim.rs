//! Account claim document schema
//!
//! The unique index on (`source`, `account_identifier`) is what makes a claim
//! atomic.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::claims::{AccountClaim, ClaimSource};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{CaError, ExternalAccountId, Result};

pub const CLAIM_COLLECTION: &str = "account_claims";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountClaimDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// `ClaimSource` name; identifiers are unique within a source
    pub source: String,

    pub account_identifier: String,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime>,
}

impl From<&AccountClaim> for AccountClaimDoc {
    fn from(claim: &AccountClaim) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            source: claim.source.as_str().to_string(),
            account_identifier: claim.account_id.as_str().to_string(),
            username: claim.username.clone(),
            claimed_at: Some(DateTime::from_chrono(claim.claimed_at)),
        }
    }
}

impl TryFrom<AccountClaimDoc> for AccountClaim {
    type Error = CaError;

    fn try_from(doc: AccountClaimDoc) -> Result<Self> {
        Ok(Self {
            source: ClaimSource::parse(&doc.source)?,
            account_id: ExternalAccountId::new(doc.account_identifier)
                .map_err(|e| CaError::Database(format!("Corrupt claim: {e}")))?,
            username: doc.username,
            claimed_at: doc.claimed_at.map(|t| t.to_chrono()).unwrap_or_default(),
        })
    }
}

impl IntoIndexes for AccountClaimDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "source": 1, "account_identifier": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("source_account_identifier_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .name("username_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AccountClaimDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_claim_doc_keeps_source() {
        let claim = AccountClaim {
            source: ClaimSource::AuthenticatorCertificate,
            account_id: ExternalAccountId::new("A1").unwrap(),
            username: "alice".into(),
            claimed_at: Utc::now(),
        };

        let doc = AccountClaimDoc::from(&claim);
        assert_eq!(doc.source, "authenticator_certificate");

        let back = AccountClaim::try_from(doc).unwrap();
        assert_eq!(back.source, claim.source);
        assert_eq!(back.account_id, claim.account_id);
    }

    #[test]
    fn test_unique_index_spans_source_and_identifier() {
        let (keys, options) = AccountClaimDoc::into_indices().remove(0);
        assert_eq!(keys, doc! { "source": 1, "account_identifier": 1 });
        assert_eq!(options.and_then(|o| o.unique), Some(true));
    }
}

//! Ceremony and identity session document schema
//!
//! Entries are removed by `find_one_and_delete` on read, and by MongoDB's TTL
//! monitor once `expires_at` has passed.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::sessions::{SessionEntry, SessionPurpose};

pub const SESSION_COLLECTION: &str = "ceremony_sessions";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CeremonySessionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub purpose: SessionPurpose,

    pub token: String,

    /// Versioned JSON envelope
    pub payload: String,

    pub expires_at: DateTime,
}

impl Default for CeremonySessionDoc {
    fn default() -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            purpose: SessionPurpose::Create,
            token: String::new(),
            payload: String::new(),
            expires_at: DateTime::MIN,
        }
    }
}

impl From<&SessionEntry> for CeremonySessionDoc {
    fn from(entry: &SessionEntry) -> Self {
        let mut metadata = Metadata::new();
        metadata.created_at = Some(DateTime::from_chrono(entry.created_at));
        Self {
            _id: None,
            metadata,
            purpose: entry.purpose,
            token: entry.token.clone(),
            payload: entry.payload.clone(),
            expires_at: DateTime::from_chrono(entry.expires_at),
        }
    }
}

impl From<CeremonySessionDoc> for SessionEntry {
    fn from(doc: CeremonySessionDoc) -> Self {
        Self {
            purpose: doc.purpose,
            token: doc.token,
            payload: doc.payload,
            created_at: doc
                .metadata
                .created_at
                .map(|t| t.to_chrono())
                .unwrap_or_default(),
            expires_at: doc.expires_at.to_chrono(),
        }
    }
}

impl IntoIndexes for CeremonySessionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "purpose": 1, "token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("purpose_token_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(std::time::Duration::from_secs(0))
                        .name("expires_at_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CeremonySessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

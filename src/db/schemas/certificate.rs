//! Issued certificate document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::certs::{codec, pack_certificate_pem};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::issuance::IssuedCertificate;
use crate::types::{AccountId, CaError, Result};

pub const CERTIFICATE_COLLECTION: &str = "issued_certificates";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CertificateDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Lowercase hex serial
    pub serial: String,

    pub account_id: String,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime>,

    /// The issued certificate, PEM
    pub certificate_pem: String,

    /// Authenticator certificate that authorized issuance, PEM
    pub authenticator_cert_pem: String,

    pub public_key_pem: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime>,
}

impl From<&IssuedCertificate> for CertificateDoc {
    fn from(cert: &IssuedCertificate) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            serial: cert.serial.clone(),
            account_id: cert.account_id.to_string(),
            username: cert.username.clone(),
            not_before: Some(DateTime::from_chrono(cert.not_before)),
            not_after: Some(DateTime::from_chrono(cert.not_after)),
            certificate_pem: pack_certificate_pem(&cert.der),
            authenticator_cert_pem: cert.authenticator_cert_pem.clone(),
            public_key_pem: cert.public_key_pem.clone(),
            issued_at: Some(DateTime::from_chrono(cert.issued_at)),
        }
    }
}

impl TryFrom<CertificateDoc> for IssuedCertificate {
    type Error = CaError;

    fn try_from(doc: CertificateDoc) -> Result<Self> {
        let der = codec::unarmor(doc.certificate_pem.as_bytes(), &[codec::CERTIFICATE_TAG])
            .map_err(|e| CaError::Database(format!("Corrupt certificate {}: {e}", doc.serial)))?;

        Ok(Self {
            serial: doc.serial,
            account_id: AccountId::parse(&doc.account_id)?,
            username: doc.username,
            not_before: doc.not_before.map(|t| t.to_chrono()).unwrap_or_default(),
            not_after: doc.not_after.map(|t| t.to_chrono()).unwrap_or_default(),
            der,
            authenticator_cert_pem: doc.authenticator_cert_pem,
            public_key_pem: doc.public_key_pem,
            issued_at: doc.issued_at.map(|t| t.to_chrono()).unwrap_or_default(),
        })
    }
}

impl IntoIndexes for CertificateDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "serial": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("serial_unique".to_string())
                        .build(),
                ),
            ),
            // Newest-first lookups per account
            (
                doc! { "account_id": 1, "issued_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("account_issued_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CertificateDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

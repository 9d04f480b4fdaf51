//! Error types for Lintel
//!
//! One taxonomy shared by every component. Lower layers return typed errors
//! and never recover silently; the caller decides whether to retry.

/// Main error type for certificate authority operations
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    /// Unparsable CSR, certificate, key or signature encoding
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Well-formed input that fails a semantic check
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier owned by someone else, lock held, stale token
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Session carrier unknown, already consumed, tampered with or expired
    #[error("Session missing or expired")]
    MissingOrExpired,

    #[error("Signing failure: {0}")]
    SigningFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaError {
    /// Whether this error belongs to the internal class (store, signing,
    /// configuration, unexpected encoding failures).
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::SigningFailure(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Short machine-readable name of the error kind, used in audit events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::MissingOrExpired => "missing_or_expired",
            Self::SigningFailure(_) => "signing_failure",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for CaError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for CaError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rcgen::Error> for CaError {
    fn from(err: rcgen::Error) -> Self {
        Self::SigningFailure(err.to_string())
    }
}

impl From<base64::DecodeError> for CaError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedInput(format!("base64: {}", err))
    }
}

impl From<pem::PemError> for CaError {
    fn from(err: pem::PemError) -> Self {
        Self::MalformedInput(format!("PEM: {}", err))
    }
}

/// Result type alias for Lintel operations
pub type Result<T> = std::result::Result<T, CaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_class() {
        assert!(CaError::Database("down".into()).is_internal());
        assert!(CaError::SigningFailure("rsa".into()).is_internal());
        assert!(!CaError::Conflict("taken".into()).is_internal());
        assert!(!CaError::MissingOrExpired.is_internal());
    }

    #[test]
    fn test_display_keeps_detail() {
        let err = CaError::BadRequest("username doesn't match CSR subject".into());
        assert_eq!(
            err.to_string(),
            "Bad request: username doesn't match CSR subject"
        );
        assert_eq!(err.kind(), "bad_request");
    }
}

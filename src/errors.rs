use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced by the token service façade.
///
/// A secret that does not match any usable token is *not* an error:
/// `TokenService::validate_token` returns `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token id already exists: {0}")]
    DuplicateId(String),

    #[error("token not found: {0}")]
    NotFound(String),

    /// Every backend in the fallback chain failed for this operation.
    #[error("all storage backends failed: {}", .attempts.join("; "))]
    PersistenceFailure { attempts: Vec<String> },

    /// Stored data could not be decrypted or parsed. Backends recover from
    /// this by treating the document as an empty collection.
    #[error("stored token data is unreadable: {0}")]
    DecryptionFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure of a single backend operation. The fallback chain turns these
/// into demotions and only reports them inside `StoreError::PersistenceFailure`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Build a `Status` error, truncating the response body so that large
    /// HTML error pages do not flood the logs.
    pub fn status(status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 256;
        let body = if body.len() > MAX_BODY {
            let mut cut = MAX_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}…", &body[..cut])
        } else {
            body.to_string()
        };
        BackendError::Status { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failure_lists_attempts() {
        let err = StoreError::PersistenceFailure {
            attempts: vec!["remote_object: timed out".into(), "in_process: boom".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("remote_object: timed out"));
        assert!(msg.contains("in_process: boom"));
    }

    #[test]
    fn test_status_body_truncated() {
        let body = "x".repeat(1000);
        match BackendError::status(502, &body) {
            BackendError::Status { status, body } => {
                assert_eq!(status, 502);
                assert!(body.len() < 300);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_crypto_failure_is_a_backend_error() {
        let err: BackendError = CryptoError::Encryption("aead failure".into()).into();
        assert!(matches!(err, BackendError::Crypto(_)));
        assert!(err.to_string().contains("aead failure"));
    }
}

//! Encoding shared by every backend that stores bytes: JSON, then sealed by
//! the crypto module.

use crate::crypto::Crypto;
use crate::errors::{BackendError, StoreError};
use crate::models::TokenCollection;

pub fn encode(crypto: &Crypto, collection: &TokenCollection) -> Result<String, BackendError> {
    let json = serde_json::to_string(collection)
        .map_err(|e| BackendError::Encode(format!("failed to serialize collection: {}", e)))?;
    Ok(crypto.encrypt(&json)?)
}

/// Decode a stored document. Blank input is an empty collection.
pub fn decode(crypto: &Crypto, raw: &str) -> Result<TokenCollection, StoreError> {
    if raw.trim().is_empty() {
        return Ok(TokenCollection::empty());
    }
    let plaintext = crypto.decrypt(raw);
    let mut collection: TokenCollection = serde_json::from_str(&plaintext)
        .map_err(|e| StoreError::DecryptionFailure(e.to_string()))?;
    let dropped = collection.dedupe();
    if dropped > 0 {
        tracing::warn!(dropped, "stored collection contained duplicate token ids");
    }
    Ok(collection)
}

/// Decode, treating unreadable content as an empty collection so that a key
/// change or format drift does not brick the store.
pub fn decode_or_empty(crypto: &Crypto, raw: &str, location: &str) -> TokenCollection {
    match decode(crypto, raw) {
        Ok(collection) => collection,
        Err(e) => {
            tracing::warn!(
                location = %location,
                "stored token data is unreadable, treating as empty: {}",
                e
            );
            TokenCollection::empty()
        }
    }
}

//! Secret hashing and payload encryption.
//!
//! Secrets are hashed with HMAC-SHA256 keyed by a salt derived from the
//! operator key, so the same secret always yields the same digest for a given
//! deployment. Stored collections are sealed with AES-256-GCM and rendered as
//! `enc:v1:BASE64(nonce||ciphertext)`.
//!
//! `decrypt` never fails: payloads written before encryption was enabled (or
//! in an older encoding) are passed through so that a format migration never
//! loses data.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::config::StoreConfig;

/// Key length in bytes (256 bits for AES-256)
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

/// Prefix of the primary encryption format.
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

/// Number of random bytes in a generated secret.
pub const GENERATED_SECRET_BYTES: usize = 32;

/// Prefix of generated secrets.
pub const GENERATED_SECRET_PREFIX: &str = "tks_";

const DEFAULT_KEY_SEED: &str = "tokenstore-derived-default-key";
const CIPHER_KEY_LABEL: &[u8] = b"tokenstore/cipher-key/v1";
const HASH_SALT_LABEL: &[u8] = b"tokenstore/hash-salt/v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Whether the payload key came from the operator or from the built-in seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionStatus {
    OperatorKey,
    DerivedDefault,
}

/// A plaintext secret held only for the duration of one hash computation.
/// The buffer is wiped on drop and never printed.
#[derive(Clone)]
pub struct PlainSecret(String);

impl PlainSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PlainSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlainSecret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for PlainSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlainSecret(**redacted**)")
    }
}

impl Drop for PlainSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Process-wide crypto state. Built once from [`StoreConfig`] and shared.
pub struct Crypto {
    cipher_key: Zeroizing<[u8; KEY_LENGTH]>,
    hash_salt: Zeroizing<[u8; KEY_LENGTH]>,
    status: EncryptionStatus,
}

impl fmt::Debug for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypto")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Crypto {
    /// Derive keys from an operator seed, or from the built-in default seed
    /// when none is configured.
    pub fn new(seed: Option<&str>) -> Self {
        let (material, status) = match seed {
            Some(seed) => (key_material(seed), EncryptionStatus::OperatorKey),
            None => (
                key_material(DEFAULT_KEY_SEED),
                EncryptionStatus::DerivedDefault,
            ),
        };

        let cipher_key = Zeroizing::new(derive(&material, CIPHER_KEY_LABEL));
        let hash_salt = Zeroizing::new(derive(&material, HASH_SALT_LABEL));

        Self {
            cipher_key,
            hash_salt,
            status,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.encryption_key.as_deref())
    }

    pub fn status(&self) -> EncryptionStatus {
        self.status
    }

    /// Hash a secret with the server-held salt. Returns lowercase hex.
    pub fn hash_secret(&self, secret: &str) -> String {
        hash_secret_with_salt(secret, &self.hash_salt[..])
    }

    /// Compare a presented secret against a stored digest in constant time.
    pub fn verify_secret(&self, secret: &str, digest: &str) -> bool {
        let computed = self.hash_secret(secret);
        digests_match(&computed, digest)
    }

    /// Encrypt a payload with AES-256-GCM under a random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.cipher_key[..])
            .map_err(|e| CryptoError::InvalidKey(format!("{:?}", e)))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(&combined)))
    }

    /// Decrypt the primary format only.
    pub fn try_decrypt(&self, value: &str) -> Result<String, CryptoError> {
        let payload = value
            .trim()
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| CryptoError::Decryption("missing format prefix".into()))?;

        let combined = BASE64
            .decode(payload)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {}", e)))?;
        if combined.len() < NONCE_LENGTH {
            return Err(CryptoError::Decryption("payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);

        let cipher = Aes256Gcm::new_from_slice(&self.cipher_key[..])
            .map_err(|e| CryptoError::InvalidKey(format!("{:?}", e)))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decryption("invalid key or corrupted data".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".into()))
    }

    /// Decrypt a payload, tolerating legacy encodings.
    ///
    /// Order: primary format, then a plain base64 decode, then the input
    /// unchanged. Callers decide whether the result is usable.
    pub fn decrypt(&self, value: &str) -> String {
        match self.try_decrypt(value) {
            Ok(plaintext) => return plaintext,
            Err(e) if value.trim().starts_with(ENCRYPTED_PREFIX) => {
                tracing::debug!("primary decryption failed: {}", e);
            }
            Err(_) => {}
        }

        if let Some(decoded) = BASE64
            .decode(value.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            return decoded;
        }

        value.to_string()
    }
}

/// Hash `secret` with an explicit salt. Deterministic, one-way, lowercase hex.
pub fn hash_secret_with_salt(secret: &str, salt: &[u8]) -> String {
    // HMAC accepts keys of any length; the error arm is unreachable in practice.
    let mut mac = match <Hmac<Sha256> as Mac>::new_from_slice(salt) {
        Ok(mac) => mac,
        Err(_) => return hex::encode(Sha256::digest([salt, secret.as_bytes()].concat())),
    };
    mac.update(secret.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time digest comparison.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Generate a fresh random secret for callers that do not bring their own.
pub fn generate_secret() -> PlainSecret {
    let mut bytes = Zeroizing::new([0u8; GENERATED_SECRET_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    PlainSecret::new(format!("{}{}", GENERATED_SECRET_PREFIX, hex::encode(&bytes[..])))
}

/// Turn an operator seed into 32 bytes of key material. A 64-char hex string
/// or base64 of exactly 32 bytes is used as-is; anything else is hashed.
fn key_material(seed: &str) -> Zeroizing<[u8; KEY_LENGTH]> {
    let trimmed = seed.trim();
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);

    if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(trimmed) {
            key.copy_from_slice(&bytes);
            return key;
        }
    }

    if let Ok(mut bytes) = BASE64.decode(trimmed) {
        if bytes.len() == KEY_LENGTH {
            key.copy_from_slice(&bytes);
            bytes.zeroize();
            return key;
        }
        bytes.zeroize();
    }

    key.copy_from_slice(&Sha256::digest(trimmed.as_bytes()));
    key
}

fn derive(material: &[u8; KEY_LENGTH], label: &[u8]) -> [u8; KEY_LENGTH] {
    let mut out = [0u8; KEY_LENGTH];
    let digest = match <Hmac<Sha256> as Mac>::new_from_slice(material) {
        Ok(mut mac) => {
            mac.update(label);
            mac.finalize().into_bytes()
        }
        Err(_) => Sha256::digest([material.as_slice(), label].concat()),
    };
    out.copy_from_slice(&digest);
    out
}

//! Token persistence with pluggable backends.
//!
//! Supports:
//! - `remote_object`: encrypted document behind an HTTP API (gist-style
//!   document or object-store blob); the only backend durable across
//!   instances and cold starts
//! - `local_file`: encrypted file on a persistent filesystem
//! - `ephemeral_scratch`: encrypted file in a scratch directory that lives
//!   only as long as one warm instance
//! - `in_process`: memory only, lost on restart
//!
//! Every backend stores a whole [`TokenCollection`]; saves are full
//! overwrites (last writer wins).

pub mod codec;
pub mod fallback;
pub mod file;
pub mod memory;
pub mod remote;

pub use fallback::{Demotion, FallbackChain};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use remote::RemoteObjectBackend;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::BackendError;
use crate::models::{Token, TokenCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    RemoteObject,
    LocalFile,
    EphemeralScratch,
    InProcess,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::RemoteObject => "remote_object",
            BackendKind::LocalFile => "local_file",
            BackendKind::EphemeralScratch => "ephemeral_scratch",
            BackendKind::InProcess => "in_process",
        }
    }

    /// Whether data written here survives a restart of this process.
    pub fn is_durable(&self) -> bool {
        matches!(self, BackendKind::RemoteObject | BackendKind::LocalFile)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend trait - implemented by all storage backends.
///
/// Every backend must be safe to call with no prior state: the first `load()`
/// returns an empty collection, not an error.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable location (path, URL) for diagnostics. Never includes
    /// credentials.
    fn location(&self) -> String {
        self.kind().to_string()
    }

    async fn load(&self) -> Result<TokenCollection, BackendError>;

    /// Overwrite the stored collection.
    async fn save(&self, collection: &TokenCollection) -> Result<(), BackendError>;

    /// Remove one token by id. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, BackendError> {
        let mut collection = self.load().await?;
        if collection.remove(id).is_none() {
            return Ok(false);
        }
        collection.touch();
        self.save(&collection).await?;
        Ok(true)
    }

    /// Replace one token by id. Returns `false` if it did not exist.
    async fn update(&self, token: Token) -> Result<bool, BackendError> {
        let mut collection = self.load().await?;
        if !collection.replace(token) {
            return Ok(false);
        }
        collection.touch();
        self.save(&collection).await?;
        Ok(true)
    }
}

//! Encrypted file backend.
//!
//! One type serves both the Local-File Backend (durable path) and the
//! Ephemeral-Scratch Backend (temp directory that only lives as long as a
//! warm instance). The encoding is identical; only the kind differs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::{codec, Backend, BackendKind};
use crate::crypto::Crypto;
use crate::errors::BackendError;
use crate::models::TokenCollection;

/// File name used inside a scratch directory.
pub const SCRATCH_FILE_NAME: &str = "tokens.json.enc";

pub struct FileBackend {
    kind: BackendKind,
    path: PathBuf,
    crypto: Arc<Crypto>,
    persist_lock: Mutex<()>,
}

impl FileBackend {
    /// Local-File Backend at an explicit path on a persistent filesystem.
    pub fn local(path: impl Into<PathBuf>, crypto: Arc<Crypto>) -> Self {
        Self {
            kind: BackendKind::LocalFile,
            path: path.into(),
            crypto,
            persist_lock: Mutex::new(()),
        }
    }

    /// Ephemeral-Scratch Backend inside `dir`.
    pub fn scratch(dir: impl AsRef<Path>, crypto: Arc<Crypto>) -> Self {
        Self {
            kind: BackendKind::EphemeralScratch,
            path: dir.as_ref().join(SCRATCH_FILE_NAME),
            crypto,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<TokenCollection, BackendError> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => {
                tracing::debug!(path = %self.path.display(), bytes = raw.len(), "loaded token file");
                Ok(codec::decode_or_empty(&self.crypto, &raw, &self.location()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "token file does not exist yet");
                Ok(TokenCollection::empty())
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Not UTF-8: same treatment as an undecryptable document.
                tracing::warn!(
                    path = %self.path.display(),
                    "token file is not valid UTF-8, treating as empty"
                );
                Ok(TokenCollection::empty())
            }
            Err(e) => Err(BackendError::Io(e)),
        }
    }

    async fn save(&self, collection: &TokenCollection) -> Result<(), BackendError> {
        let data = codec::encode(&self.crypto, collection)?;

        let _guard = self.persist_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("enc.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            tokens = collection.len(),
            "saved token file"
        );
        Ok(())
    }
}

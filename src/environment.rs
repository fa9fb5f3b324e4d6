//! Runtime environment probe.
//!
//! Run once at startup to decide which backends can be part of the chain.
//! Remote credentials and the serverless marker come from [`StoreConfig`];
//! the filesystem checks are done here by actually writing a probe file.

use std::path::Path;

use serde::Serialize;
use tokio::fs;

use crate::config::StoreConfig;

const PROBE_FILE_NAME: &str = ".tokenstore-probe";

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEnvironment {
    pub remote_configured: bool,
    /// The directory holding the local token file accepts writes.
    pub persistent_writable: bool,
    pub scratch_writable: bool,
    pub serverless_platform: Option<String>,
    /// `TOKENSTORE_FILE_PATH` was set, so the filesystem is trusted even on
    /// a serverless platform.
    pub explicit_file_path: bool,
}

impl RuntimeEnvironment {
    pub async fn detect(config: &StoreConfig) -> Self {
        let local_path = config.local_file_path();
        let local_dir = local_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let env = Self {
            remote_configured: config.remote.is_some(),
            persistent_writable: is_writable_dir(local_dir).await,
            scratch_writable: is_writable_dir(&config.scratch_dir).await,
            serverless_platform: config.serverless_platform.clone(),
            explicit_file_path: config.file_path.is_some(),
        };
        tracing::debug!(?env, "runtime environment detected");
        env
    }

    /// Whether the Local-File Backend belongs in the chain.
    pub fn local_file_usable(&self) -> bool {
        self.persistent_writable && (self.serverless_platform.is_none() || self.explicit_file_path)
    }
}

/// Create `dir` if needed and confirm a file can be written and removed.
async fn is_writable_dir(dir: &Path) -> bool {
    if let Err(e) = fs::create_dir_all(dir).await {
        tracing::debug!(dir = %dir.display(), "directory not writable: {}", e);
        return false;
    }
    let probe = dir.join(PROBE_FILE_NAME);
    match fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = fs::remove_file(&probe).await;
            true
        }
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "directory not writable: {}", e);
            false
        }
    }
}

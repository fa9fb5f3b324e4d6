//! Fallback orchestrator.
//!
//! Holds the ordered backend chain and the index of the active backend. Any
//! failure on the active backend (I/O, network, timeout, malformed response)
//! moves the active index one step down for the rest of the process lifetime
//! and the operation is retried there. The index never moves back up.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::{Backend, BackendKind, FileBackend, InMemoryBackend, RemoteObjectBackend};
use crate::config::StoreConfig;
use crate::crypto::Crypto;
use crate::environment::RuntimeEnvironment;
use crate::errors::{BackendError, StoreError};
use crate::models::TokenCollection;

/// A recorded move from one backend to the next.
#[derive(Debug, Clone, Serialize)]
pub struct Demotion {
    pub from: BackendKind,
    pub to: BackendKind,
    pub operation: &'static str,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One entry of the chain as reported by `storage_info()`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub kind: BackendKind,
    pub location: String,
    pub durable: bool,
    pub active: bool,
}

pub struct FallbackChain {
    backends: Vec<Arc<dyn Backend>>,
    active: AtomicUsize,
    timeout: Duration,
    demotions: Mutex<Vec<Demotion>>,
}

impl FallbackChain {
    /// `backends` in priority order, highest first.
    pub fn new(backends: Vec<Arc<dyn Backend>>, timeout: Duration) -> Self {
        Self {
            backends,
            active: AtomicUsize::new(0),
            timeout,
            demotions: Mutex::new(Vec::new()),
        }
    }

    /// Build the chain from what the runtime probe found:
    /// remote → local file → scratch → memory.
    pub fn from_environment(
        env: &RuntimeEnvironment,
        config: &StoreConfig,
        crypto: Arc<Crypto>,
    ) -> Self {
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

        if let Some(remote) = &config.remote {
            match RemoteObjectBackend::from_config(remote, crypto.clone(), config.backend_timeout) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => tracing::warn!(
                    "remote token store is configured but could not be initialized, skipping: {}",
                    e
                ),
            }
        }

        if env.local_file_usable() {
            backends.push(Arc::new(FileBackend::local(
                config.local_file_path(),
                crypto.clone(),
            )));
        } else if let Some(platform) = &env.serverless_platform {
            tracing::debug!(platform = %platform, "skipping local file backend on serverless platform");
        }

        if env.scratch_writable {
            backends.push(Arc::new(FileBackend::scratch(&config.scratch_dir, crypto)));
        }

        if config.memory_fallback {
            backends.push(Arc::new(InMemoryBackend::new()));
        }

        let chain = Self::new(backends, config.backend_timeout);
        match chain.active_backend() {
            Some(active) => {
                tracing::info!(
                    active = %active.kind(),
                    location = %active.location(),
                    chain = %chain.describe(),
                    "token storage chain selected"
                );
                if !active.kind().is_durable() {
                    tracing::warn!(
                        active = %active.kind(),
                        "no durable token storage available; tokens will not survive a restart"
                    );
                }
            }
            None => tracing::error!("no token storage backend is available"),
        }
        chain
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn active_backend(&self) -> Option<&Arc<dyn Backend>> {
        self.backends.get(self.active_index())
    }

    pub fn active_kind(&self) -> Option<BackendKind> {
        self.active_backend().map(|b| b.kind())
    }

    pub fn active_location(&self) -> Option<String> {
        self.active_backend().map(|b| b.location())
    }

    pub fn chain(&self) -> Vec<ChainEntry> {
        let active = self.active_index();
        self.backends
            .iter()
            .enumerate()
            .map(|(i, b)| ChainEntry {
                kind: b.kind(),
                location: b.location(),
                durable: b.kind().is_durable(),
                active: i == active,
            })
            .collect()
    }

    pub async fn demotions(&self) -> Vec<Demotion> {
        self.demotions.lock().await.clone()
    }

    fn describe(&self) -> String {
        self.backends
            .iter()
            .map(|b| b.kind().as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub async fn load(&self) -> Result<TokenCollection, StoreError> {
        let mut attempts = Vec::new();
        for idx in self.active_index()..self.backends.len() {
            let backend = &self.backends[idx];
            match self.bounded(backend.load()).await {
                Ok(collection) => return Ok(collection),
                Err(e) => {
                    attempts.push(format!("{}: {}", backend.kind(), e));
                    self.demote(idx, "load", &e).await;
                }
            }
        }
        Err(self.exhausted("load", attempts))
    }

    pub async fn save(&self, collection: &TokenCollection) -> Result<(), StoreError> {
        let mut attempts = Vec::new();
        for idx in self.active_index()..self.backends.len() {
            let backend = &self.backends[idx];
            match self.bounded(backend.save(collection)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts.push(format!("{}: {}", backend.kind(), e));
                    self.demote(idx, "save", &e).await;
                }
            }
        }
        Err(self.exhausted("save", attempts))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    async fn demote(&self, failed: usize, operation: &'static str, error: &BackendError) {
        let Some(next) = self.backends.get(failed + 1) else {
            tracing::warn!(
                backend = %self.backends[failed].kind(),
                operation,
                "last token storage backend failed: {}",
                error
            );
            return;
        };

        let previous = self.active.fetch_max(failed + 1, Ordering::AcqRel);
        if previous > failed {
            // Another caller already moved past this backend.
            return;
        }

        let from = self.backends[failed].kind();
        tracing::warn!(
            from = %from,
            to = %next.kind(),
            operation,
            "token storage backend failed, demoting: {}",
            error
        );
        self.demotions.lock().await.push(Demotion {
            from,
            to: next.kind(),
            operation,
            reason: error.to_string(),
            at: Utc::now(),
        });
    }

    fn exhausted(&self, operation: &str, mut attempts: Vec<String>) -> StoreError {
        if attempts.is_empty() {
            attempts.push("no storage backends configured".to_string());
        }
        tracing::error!(operation, attempts = attempts.len(), "every token storage backend failed");
        StoreError::PersistenceFailure { attempts }
    }
}

//! Read cache in front of the fallback chain.
//!
//! Writes go straight to the backends and then call
//! [`CoherencyCache::invalidate`]. A load that started before an invalidation
//! never fills the cache afterwards: every fill carries the invalidation epoch
//! and the generation marker value observed before the load began.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::models::TokenCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Empty,
    Populated,
    Expired,
}

/// Snapshot reported by `storage_info()`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheFreshness {
    pub state: CacheState,
    pub age_ms: Option<u64>,
    pub ttl_ms: u64,
    pub generation_marker: Option<PathBuf>,
}

struct CacheEntry {
    collection: TokenCollection,
    loaded_at: Instant,
    /// Marker value observed when the entry was filled.
    generation: Option<String>,
}

/// Shared file whose content is replaced on every invalidation. Instances
/// on the same filesystem compare it on each cache check to notice writes
/// made by someone else.
pub struct GenerationMarker {
    path: PathBuf,
}

impl GenerationMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value. A missing marker reads as empty; `None` means the
    /// marker could not be read and the cache should not be trusted.
    pub async fn current(&self) -> Option<String> {
        match fs::read_to_string(&self.path).await {
            Ok(v) => Some(v.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(String::new()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "cannot read generation marker: {}", e);
                None
            }
        }
    }

    pub async fn bump(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, uuid::Uuid::new_v4().simple().to_string()).await?;
        fs::rename(&tmp, &self.path).await
    }
}

/// State observed before a load, used to decide whether its result may
/// still be cached once the load finishes.
struct FillTicket {
    epoch: u64,
    generation: Option<String>,
}

/// Short-TTL read cache.
///
/// `Empty → Populated → Expired → Empty`. Expired entries are dropped lazily
/// on the next read. Concurrent misses each perform their own load; there is
/// no single-flight. A TTL of zero disables caching.
pub struct CoherencyCache {
    entry: RwLock<Option<CacheEntry>>,
    /// Bumped by every `invalidate()`.
    epoch: AtomicU64,
    ttl: Duration,
    marker: Option<GenerationMarker>,
}

impl CoherencyCache {
    pub fn new(ttl: Duration, marker: Option<GenerationMarker>) -> Self {
        Self {
            entry: RwLock::new(None),
            epoch: AtomicU64::new(0),
            ttl,
            marker,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Fresh cached collection, if any.
    pub async fn get(&self) -> Option<TokenCollection> {
        if !self.is_enabled() {
            return None;
        }
        let generation = self.current_generation().await;
        {
            let guard = self.entry.read().await;
            let entry = guard.as_ref()?;
            if self.is_fresh(entry, generation.as_ref()) {
                tracing::debug!(tokens = entry.collection.len(), "token cache hit");
                return Some(entry.collection.clone());
            }
        }
        let mut guard = self.entry.write().await;
        // another task may have refilled it in between
        if let Some(entry) = guard.as_ref() {
            if self.is_fresh(entry, generation.as_ref()) {
                return Some(entry.collection.clone());
            }
            tracing::debug!("token cache entry expired");
            guard.take();
        }
        None
    }

    /// Cache `collection` as of now.
    pub async fn put(&self, collection: TokenCollection) {
        if !self.is_enabled() {
            return;
        }
        let ticket = self.ticket().await;
        self.fill(ticket, collection).await;
    }

    /// Return the cached collection or run `load` and cache its result.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<TokenCollection, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenCollection, StoreError>>,
    {
        if let Some(hit) = self.get().await {
            return Ok(hit);
        }
        tracing::debug!("token cache miss");
        self.refresh(load).await
    }

    /// Always run `load`, then cache its result unless an invalidation
    /// happened while it was running.
    pub async fn refresh<F, Fut>(&self, load: F) -> Result<TokenCollection, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenCollection, StoreError>>,
    {
        if !self.is_enabled() {
            return load().await;
        }
        let ticket = self.ticket().await;
        let collection = load().await?;
        self.fill(ticket, collection.clone()).await;
        Ok(collection)
    }

    /// Drop the local entry and, if configured, bump the shared marker so
    /// other instances drop theirs too.
    pub async fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entry.write().await.take();
        if let Some(marker) = &self.marker {
            if let Err(e) = marker.bump().await {
                tracing::warn!(
                    path = %marker.path().display(),
                    "failed to bump generation marker: {}",
                    e
                );
            }
        }
    }

    pub async fn state(&self) -> CacheState {
        let generation = self.current_generation().await;
        let guard = self.entry.read().await;
        match guard.as_ref() {
            None => CacheState::Empty,
            Some(entry) if self.is_fresh(entry, generation.as_ref()) => CacheState::Populated,
            Some(_) => CacheState::Expired,
        }
    }

    pub async fn freshness(&self) -> CacheFreshness {
        let state = self.state().await;
        let age_ms = self
            .entry
            .read()
            .await
            .as_ref()
            .map(|e| e.loaded_at.elapsed().as_millis() as u64);
        CacheFreshness {
            state,
            age_ms,
            ttl_ms: self.ttl.as_millis() as u64,
            generation_marker: self.marker.as_ref().map(|m| m.path().to_path_buf()),
        }
    }

    async fn ticket(&self) -> FillTicket {
        FillTicket {
            epoch: self.epoch.load(Ordering::SeqCst),
            generation: self.current_generation().await.flatten(),
        }
    }

    async fn fill(&self, ticket: FillTicket, collection: TokenCollection) {
        let mut guard = self.entry.write().await;
        if self.epoch.load(Ordering::SeqCst) != ticket.epoch {
            tracing::debug!("cache invalidated during load; result not cached");
            return;
        }
        *guard = Some(CacheEntry {
            collection,
            loaded_at: Instant::now(),
            generation: ticket.generation,
        });
    }

    /// Outer `None`: no marker configured. `Some(None)`: marker unreadable.
    async fn current_generation(&self) -> Option<Option<String>> {
        match &self.marker {
            Some(marker) => Some(marker.current().await),
            None => None,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, generation: Option<&Option<String>>) -> bool {
        if entry.loaded_at.elapsed() >= self.ttl {
            return false;
        }
        match generation {
            None => true,
            Some(None) => false,
            Some(current) => current == &entry.generation,
        }
    }
}

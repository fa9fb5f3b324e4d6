//! Token service: the narrow façade every caller goes through.
//!
//! Reads (`validate_token`, `get`, `list_*`) go through the coherency cache.
//! Writes always load fresh from the fallback chain, mutate, save the whole
//! collection and then invalidate the cache. Writes within one process are
//! serialized; across processes the last writer wins.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{CacheFreshness, CoherencyCache, GenerationMarker};
use crate::config::StoreConfig;
use crate::crypto::{self, Crypto, EncryptionStatus, PlainSecret};
use crate::environment::RuntimeEnvironment;
use crate::errors::StoreError;
use crate::models::{EmptyPermissionPolicy, NewToken, Token, TokenCollection, TokenStatus, TokenUpdate};
use crate::store::fallback::ChainEntry;
use crate::store::{BackendKind, Demotion, FallbackChain};

/// Diagnostic snapshot of where tokens are being kept.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub active_backend: Option<BackendKind>,
    pub location: Option<String>,
    /// Whether the active backend survives a restart.
    pub durable: bool,
    pub chain: Vec<ChainEntry>,
    pub demotions: Vec<Demotion>,
    pub encryption: EncryptionStatus,
    pub empty_permissions: EmptyPermissionPolicy,
    pub cache: CacheFreshness,
}

pub struct TokenService {
    crypto: Arc<Crypto>,
    chain: FallbackChain,
    cache: CoherencyCache,
    policy: EmptyPermissionPolicy,
    write_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(
        crypto: Arc<Crypto>,
        chain: FallbackChain,
        cache: CoherencyCache,
        policy: EmptyPermissionPolicy,
    ) -> Self {
        Self {
            crypto,
            chain,
            cache,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    /// Probe the runtime and build the full stack from configuration.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let crypto = Arc::new(Crypto::from_config(config));
        let env = RuntimeEnvironment::detect(config).await;
        let chain = FallbackChain::from_environment(&env, config, crypto.clone());
        let cache = CoherencyCache::new(
            config.cache_ttl,
            config.invalidation_marker.clone().map(GenerationMarker::new),
        );
        Self::new(crypto, chain, cache, config.empty_permissions)
    }

    pub fn crypto(&self) -> &Crypto {
        &self.crypto
    }

    /// Issue a token for `secret`. The secret is hashed and then dropped;
    /// the returned token only carries the hash.
    pub async fn create_token(
        &self,
        secret: impl Into<PlainSecret>,
        new: NewToken,
    ) -> Result<Token, StoreError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(StoreError::InvalidInput("secret must not be empty".into()));
        }

        let id = match new.id {
            Some(id) if id.trim().is_empty() => {
                return Err(StoreError::InvalidInput("token id must not be empty".into()))
            }
            Some(id) => id.trim().to_string(),
            None => format!("tok_{}", uuid::Uuid::new_v4().simple()),
        };

        let token = Token {
            name: new.name.unwrap_or_else(|| id.clone()),
            id,
            secret_hash: self.crypto.hash_secret(secret.expose()),
            permissions: new.permissions,
            status: TokenStatus::Active,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            auxiliary_data: new.auxiliary_data,
        };
        drop(secret);

        let stored = token.clone();
        self.write(move |collection| collection.insert(token)).await?;
        tracing::info!(token_id = %stored.id, "token created");
        Ok(stored)
    }

    /// Find the usable token matching `secret`. `Ok(None)` when nothing
    /// matches, the match is revoked, or it has expired.
    pub async fn validate_token(&self, secret: &str) -> Result<Option<Token>, StoreError> {
        if secret.is_empty() {
            return Ok(None);
        }
        let collection = self.read().await?;
        Ok(self.find_usable(&collection, secret))
    }

    /// Like [`validate_token`](Self::validate_token) but always reads from
    /// the backend.
    pub async fn validate_token_fresh(&self, secret: &str) -> Result<Option<Token>, StoreError> {
        if secret.is_empty() {
            return Ok(None);
        }
        let collection = self.cache.refresh(|| self.chain.load()).await?;
        Ok(self.find_usable(&collection, secret))
    }

    fn find_usable(&self, collection: &TokenCollection, secret: &str) -> Option<Token> {
        let digest = self.crypto.hash_secret(secret);
        let now = Utc::now();
        let found = collection
            .tokens
            .iter()
            .find(|t| crypto::digests_match(&t.secret_hash, &digest) && t.is_usable_at(now))
            .cloned();
        match &found {
            Some(t) => tracing::debug!(token_id = %t.id, "token validated"),
            None => tracing::debug!("no usable token matches presented secret"),
        }
        found
    }

    pub fn has_permission(&self, token: &Token, required: &str) -> bool {
        token.grants(required, self.policy)
    }

    /// Soft-revoke: the token stays stored as inactive.
    pub async fn revoke(&self, id: &str) -> Result<Token, StoreError> {
        let token = self
            .update(
                id,
                TokenUpdate {
                    status: Some(TokenStatus::Inactive),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(token_id = %id, "token revoked");
        Ok(token)
    }

    pub async fn update(&self, id: &str, update: TokenUpdate) -> Result<Token, StoreError> {
        if update.is_empty() {
            return self.get(id).await;
        }
        let id = id.to_string();
        self.write(move |collection| {
            let token = collection
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            token.apply(update);
            Ok(token.clone())
        })
        .await
    }

    /// Hard delete. Returns the removed token.
    pub async fn delete(&self, id: &str) -> Result<Token, StoreError> {
        let owned = id.to_string();
        let removed = self
            .write(move |collection| {
                collection
                    .remove(&owned)
                    .ok_or_else(|| StoreError::NotFound(owned.clone()))
            })
            .await?;
        tracing::info!(token_id = %id, "token deleted");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Result<Token, StoreError> {
        self.read()
            .await?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Active, unexpired tokens.
    pub async fn list_active(&self) -> Result<Vec<Token>, StoreError> {
        let now = Utc::now();
        Ok(self
            .read()
            .await?
            .tokens
            .into_iter()
            .filter(|t| t.is_usable_at(now))
            .collect())
    }

    pub async fn list_all(&self) -> Result<Vec<Token>, StoreError> {
        Ok(self.read().await?.tokens)
    }

    /// Remove every token whose expiry has passed. Returns how many were
    /// removed; nothing is written when that is zero.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.chain.load().await?;
        let removed = collection.remove_expired(Utc::now());
        if removed > 0 {
            collection.touch();
            self.chain.save(&collection).await?;
            self.cache.invalidate().await;
            tracing::info!(removed, "expired tokens removed");
        }
        Ok(removed)
    }

    pub async fn storage_info(&self) -> StorageInfo {
        let active_backend = self.chain.active_kind();
        StorageInfo {
            active_backend,
            location: self.chain.active_location(),
            durable: active_backend.map(|k| k.is_durable()).unwrap_or(false),
            chain: self.chain.chain(),
            demotions: self.chain.demotions().await,
            encryption: self.crypto.status(),
            empty_permissions: self.policy,
            cache: self.cache.freshness().await,
        }
    }

    async fn read(&self) -> Result<TokenCollection, StoreError> {
        self.cache.get_or_load(|| self.chain.load()).await
    }

    /// Fresh load, mutate, save whole collection, invalidate cache.
    async fn write<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut TokenCollection) -> Result<T, StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.chain.load().await?;
        let out = mutate(&mut collection)?;
        collection.touch();
        self.chain.save(&collection).await?;
        self.cache.invalidate().await;
        Ok(out)
    }
}

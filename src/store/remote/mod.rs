//! Remote-Object Backend: the encrypted collection stored as one named
//! object behind a network API.
//!
//! Two transports are supported:
//!
//! ```text
//! # Gist-style document API (one file inside one document)
//! TOKENSTORE_GIST_TOKEN=ghp_...
//! TOKENSTORE_GIST_ID=0123abcd
//!
//! # Object store blob
//! TOKENSTORE_OBJECT_URL=s3://my-bucket?region=eu-west-1
//! TOKENSTORE_OBJECT_URL=s3://my-bucket?endpoint=http://minio:9000&region=us-east-1
//! TOKENSTORE_OBJECT_URL=gs://my-bucket
//! TOKENSTORE_OBJECT_URL=az://my-container
//! TOKENSTORE_OBJECT_URL=file:///var/lib/tokenstore
//! ```
//!
//! Writes are full overwrites with no conditional check: two instances
//! saving at once resolve as last writer wins.

pub mod gist;
pub mod object;

pub use gist::GistTransport;
pub use object::ObjectStoreTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{codec, Backend, BackendKind};
use crate::config::RemoteConfig;
use crate::crypto::Crypto;
use crate::errors::BackendError;
use crate::models::TokenCollection;

/// Moves one opaque string to and from the remote object.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Diagnostic location. Must not contain credentials.
    fn describe(&self) -> String;

    /// Current object contents, or `None` if the object does not exist yet.
    async fn fetch(&self) -> Result<Option<String>, BackendError>;

    /// Replace the object contents.
    async fn put(&self, contents: String) -> Result<(), BackendError>;
}

pub struct RemoteObjectBackend {
    transport: Box<dyn ObjectTransport>,
    crypto: Arc<Crypto>,
}

impl RemoteObjectBackend {
    pub fn new(transport: Box<dyn ObjectTransport>, crypto: Arc<Crypto>) -> Self {
        Self { transport, crypto }
    }

    pub fn from_config(
        remote: &RemoteConfig,
        crypto: Arc<Crypto>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let transport: Box<dyn ObjectTransport> = match remote {
            RemoteConfig::Gist {
                api_base,
                token,
                gist_id,
                file_name,
            } => Box::new(GistTransport::new(
                api_base, token, gist_id, file_name, timeout,
            )?),
            RemoteConfig::ObjectStore { url, key } => {
                Box::new(ObjectStoreTransport::from_url(url, key)?)
            }
        };
        Ok(Self::new(transport, crypto))
    }
}

#[async_trait]
impl Backend for RemoteObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteObject
    }

    fn location(&self) -> String {
        self.transport.describe()
    }

    async fn load(&self) -> Result<TokenCollection, BackendError> {
        match self.transport.fetch().await? {
            Some(raw) => Ok(codec::decode_or_empty(&self.crypto, &raw, &self.location())),
            None => {
                tracing::debug!(location = %self.location(), "remote token object does not exist yet");
                Ok(TokenCollection::empty())
            }
        }
    }

    async fn save(&self, collection: &TokenCollection) -> Result<(), BackendError> {
        let data = codec::encode(&self.crypto, collection)?;
        self.transport.put(data).await?;
        tracing::debug!(
            location = %self.location(),
            tokens = collection.len(),
            "saved remote token object"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Token, TokenStatus};
    use chrono::Utc;

    fn token(id: &str) -> Token {
        Token {
            id: id.into(),
            name: id.into(),
            secret_hash: "00".into(),
            permissions: Default::default(),
            status: TokenStatus::Active,
            created_at: Utc::now(),
            expires_at: None,
            auxiliary_data: None,
        }
    }

    fn memory_backend(crypto: Arc<Crypto>) -> RemoteObjectBackend {
        RemoteObjectBackend::from_config(
            &RemoteConfig::ObjectStore {
                url: "memory://".into(),
                key: "tokens.json.enc".into(),
            },
            crypto,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_object_loads_empty() {
        let backend = memory_backend(Arc::new(Crypto::new(Some("k"))));
        assert_eq!(backend.kind(), BackendKind::RemoteObject);
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let backend = memory_backend(Arc::new(Crypto::new(Some("k"))));
        backend
            .save(&TokenCollection::from_tokens(vec![token("t1"), token("t2")]))
            .await
            .unwrap();
        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 2);

        assert!(backend.delete("t1").await.unwrap());
        assert_eq!(backend.load().await.unwrap().len(), 1);
    }
}

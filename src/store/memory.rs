use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Backend, BackendKind};
use crate::errors::BackendError;
use crate::models::{Token, TokenCollection};

/// In-Process Backend. Last resort: always available, lost on restart.
#[derive(Default)]
pub struct InMemoryBackend {
    collection: RwLock<TokenCollection>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn location(&self) -> String {
        "process memory".to_string()
    }

    async fn load(&self) -> Result<TokenCollection, BackendError> {
        Ok(self.collection.read().await.clone())
    }

    async fn save(&self, collection: &TokenCollection) -> Result<(), BackendError> {
        *self.collection.write().await = collection.clone();
        Ok(())
    }

    // Overridden so the read-modify-write happens under one lock.
    async fn delete(&self, id: &str) -> Result<bool, BackendError> {
        let mut guard = self.collection.write().await;
        let removed = guard.remove(id).is_some();
        if removed {
            guard.touch();
        }
        Ok(removed)
    }

    async fn update(&self, token: Token) -> Result<bool, BackendError> {
        let mut guard = self.collection.write().await;
        let replaced = guard.replace(token);
        if replaced {
            guard.touch();
        }
        Ok(replaced)
    }
}

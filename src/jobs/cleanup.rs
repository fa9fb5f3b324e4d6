//! Background job: remove expired tokens.
//!
//! Opt-in. Nothing in the store spawns this on its own; a long-lived host
//! (or `tokenstore cleanup --every`) calls [`spawn`] once.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::service::TokenService;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the periodic sweep. The first sweep runs immediately.
pub fn spawn(service: Arc<TokenService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&service).await;
        }
    })
}

/// One sweep. Failures are logged and retried on the next tick.
pub async fn sweep(service: &TokenService) -> Option<usize> {
    match service.cleanup_expired().await {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!(removed, "cleanup job removed expired tokens");
            }
            Some(removed)
        }
        Err(e) => {
            tracing::error!("cleanup job failed: {}", e);
            None
        }
    }
}

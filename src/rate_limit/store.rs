use super::local::LocalStore;
use super::redis::RedisStore;
use super::types::Increment;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the local store drops expired counters
pub const LOCAL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which backend a counting store runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Shared,
}

/// Fixed-window counter storage.
///
/// `increment` must be atomic per key: concurrent callers on the same key
/// observe distinct, consecutive counts. The window starts at the first
/// increment of a key and later increments never extend it.
#[async_trait]
pub trait CountingStore: Send + Sync {
    async fn increment(&self, key: &str, period: Duration) -> Result<Increment>;

    fn kind(&self) -> StoreKind;
}

/// Build the counting store for the process lifetime.
///
/// When the shared store is requested it is connected and probed once. Any
/// failure is logged and the local store is used instead; it is never
/// retried later.
pub async fn select_store(config: &RateLimitingConfig) -> Arc<dyn CountingStore> {
    if config.use_redis {
        let probe_timeout = Duration::from_secs(config.redis_probe_timeout_secs);
        match RedisStore::connect(&config.redis_url, probe_timeout).await {
            Ok(store) => {
                info!(url = %config.redis_url, "Using shared store for rate limiting");
                metrics::record_store_backend(StoreKind::Shared);
                return Arc::new(store);
            }
            Err(e) => {
                warn!(error = %e, "Falling back to local rate limit store");
            }
        }
    }

    info!("Using local store for rate limiting");
    metrics::record_store_backend(StoreKind::Local);
    let store = Arc::new(LocalStore::new());
    store.spawn_sweeper(LOCAL_SWEEP_INTERVAL);
    store
}

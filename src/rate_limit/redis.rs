use super::lua_scripts::FIXED_WINDOW_SCRIPT;
use super::store::{CountingStore, StoreKind};
use super::types::Increment;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::{debug, error};

/// Namespace for counter keys in the shared store
pub const KEY_PREFIX: &str = "api_gateway_ratelimit";

/// Redis-backed counting store shared by every gateway instance
pub struct RedisStore {
    /// Redis connection manager
    connection: ConnectionManager,
    script: Script,
}

impl RedisStore {
    /// Connect to Redis and verify it answers a `PING` within `probe_timeout`
    pub async fn connect(redis_url: &str, probe_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| GatewayError::StoreUnavailable(format!("invalid Redis URL: {}", e)))?;

        let probe = async {
            let mut connection = ConnectionManager::new(client).await?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut connection)
                .await?;
            Ok::<_, redis::RedisError>(connection)
        };

        let connection = tokio::time::timeout(probe_timeout, probe)
            .await
            .map_err(|_| {
                GatewayError::StoreUnavailable(format!(
                    "no answer from Redis within {:?}",
                    probe_timeout
                ))
            })?
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?;

        debug!("Redis answered health probe");

        Ok(Self {
            connection,
            script: Script::new(FIXED_WINDOW_SCRIPT),
        })
    }

    fn namespaced(key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn increment(&self, key: &str, period: Duration) -> Result<Increment> {
        let mut connection = self.connection.clone();
        let redis_key = Self::namespaced(key);

        let result = self
            .script
            .key(&redis_key)
            .arg(period.as_millis() as u64)
            .invoke_async::<_, Vec<i64>>(&mut connection)
            .await
            .map_err(|e| {
                error!(key = %redis_key, error = %e, "Redis error during rate limit increment");
                GatewayError::Store(e.to_string())
            })?;

        match result.as_slice() {
            [count, ttl_ms] => Ok(Increment {
                count: (*count).max(0) as u64,
                ttl: Duration::from_millis((*ttl_ms).max(0) as u64),
            }),
            other => Err(GatewayError::Store(format!(
                "unexpected script reply: {:?}",
                other
            ))),
        }
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: tests marked #[ignore] require a running Redis instance.
    // Run with: cargo test -- --ignored

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(
            RedisStore::namespaced("10.0.0.1:api"),
            "api_gateway_ratelimit:10.0.0.1:api"
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = RedisStore::connect("redis://127.0.0.1:1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window() {
        let store = RedisStore::connect("redis://127.0.0.1:6379", Duration::from_secs(3))
            .await
            .expect("Failed to connect to Redis");

        let key = format!("test-fw-{}", rand::random::<u32>());
        let period = Duration::from_secs(60);

        for expected in 1..=5 {
            let result = store.increment(&key, period).await.unwrap();
            assert_eq!(result.count, expected);
            assert!(result.ttl <= period);
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_window_resets() {
        let store = RedisStore::connect("redis://127.0.0.1:6379", Duration::from_secs(3))
            .await
            .expect("Failed to connect to Redis");

        let key = format!("test-reset-{}", rand::random::<u32>());
        let period = Duration::from_millis(300);

        store.increment(&key, period).await.unwrap();
        store.increment(&key, period).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.increment(&key, period).await.unwrap().count, 1);
    }
}

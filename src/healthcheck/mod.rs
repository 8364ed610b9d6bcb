use crate::config::{ServiceGroup, ServicesConfig};
use crate::error::{GatewayError, Result};
use axum::{extract::State, Json};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on each backend probe made by the aggregate health endpoint
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Name the gateway reports itself under
pub const GATEWAY_SERVICE: &str = "api-gateway";

/// Backends probed by `/health/all`
pub struct HealthChecker {
    client: reqwest::Client,
    backends: Vec<(&'static str, String)>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("backends", &self.backends)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(services: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| {
                GatewayError::Internal(format!("Failed to create health check client: {}", e))
            })?;

        let backends = ServiceGroup::ALL
            .iter()
            .map(|group| {
                let url = format!("{}/health", services.base_url(*group).trim_end_matches('/'));
                (group.service_name(), url)
            })
            .collect();

        Ok(Self { client, backends })
    }

    /// Probe one backend; any 2xx answer is healthy
    async fn probe(&self, name: &str, url: &str) -> bool {
        debug!(url = %url, "Performing health check");

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    backend = name,
                    status = %response.status(),
                    "Health check failed: unexpected status"
                );
                false
            }
            Err(e) => {
                warn!(backend = name, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Probe every backend concurrently
    pub async fn check_all(&self) -> Value {
        let probes = self
            .backends
            .iter()
            .map(|(name, url)| async move { (*name, self.probe(name, url).await) });
        let results = join_all(probes).await;

        let mut services = Map::new();
        services.insert(GATEWAY_SERVICE.to_string(), json!("healthy"));
        let mut degraded = false;

        for (name, healthy) in results {
            degraded |= !healthy;
            let status = if healthy { "healthy" } else { "unhealthy" };
            services.insert(name.to_string(), json!(status));
        }

        let overall = if degraded { "degraded" } else { "healthy" };
        json!({
            "status": overall,
            "services": services,
        })
    }
}

/// Liveness of the gateway itself
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": GATEWAY_SERVICE,
    }))
}

/// Gateway and backend health
pub async fn health_all_handler(State(checker): State<Arc<HealthChecker>>) -> Json<Value> {
    Json(checker.check_all().await)
}

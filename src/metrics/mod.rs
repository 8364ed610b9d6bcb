use crate::error::{GatewayError, Result};
use crate::rate_limit::{StoreKind, Tier};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The recorder can be installed once per process
static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: PrometheusHandle,
}

impl MetricsService {
    /// Install the Prometheus recorder, or reuse the one already installed
    pub fn new() -> Result<Self> {
        let mut slot = HANDLE
            .lock()
            .map_err(|_| GatewayError::Internal("metrics handle lock poisoned".to_string()))?;

        if let Some(handle) = slot.as_ref() {
            return Ok(Self {
                handle: handle.clone(),
            });
        }

        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        // Register all metrics with descriptions
        Self::register_metrics();
        info!("Metrics service initialized successfully");

        *slot = Some(handle.clone());
        Ok(Self { handle })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "gateway_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "gateway_request_duration_seconds",
            "HTTP request latencies in seconds"
        );

        describe_counter!(
            "gateway_backend_requests_total",
            "Total number of requests sent to backends"
        );
        describe_counter!(
            "gateway_backend_errors_total",
            "Total number of backend transport errors"
        );
        describe_histogram!(
            "gateway_backend_duration_seconds",
            "Backend request latencies in seconds"
        );

        describe_counter!(
            "gateway_auth_failures_total",
            "Total number of authentication failures"
        );
        describe_counter!(
            "gateway_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_gauge!(
            "gateway_shared_store_active",
            "Rate limit counting store (1 = shared, 0 = local)"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Count every request and its latency
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;
    record_request(&method, response.status().as_u16(), start.elapsed());
    response
}

/// Record a request metric
pub fn record_request(method: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record a completed backend call
pub fn record_backend_request(service: &str, status: u16, duration: Duration) {
    let labels = [
        ("service", service.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_backend_requests_total", &labels).increment(1);
    histogram!("gateway_backend_duration_seconds", "service" => service.to_string())
        .record(duration.as_secs_f64());
}

/// Record a backend call that failed at the transport level
pub fn record_backend_error(service: &str) {
    counter!("gateway_backend_errors_total", "service" => service.to_string()).increment(1);
}

/// Record an authentication rejection
pub fn record_auth_failure(reason: &str) {
    counter!("gateway_auth_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded(tier: Tier) {
    counter!("gateway_rate_limit_exceeded_total", "tier" => tier.as_str()).increment(1);
}

/// Record which counting store was selected at startup
pub fn record_store_backend(kind: StoreKind) {
    let active = match kind {
        StoreKind::Shared => 1.0,
        StoreKind::Local => 0.0,
    };
    gauge!("gateway_shared_store_active").set(active);
}

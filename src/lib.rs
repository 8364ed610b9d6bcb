pub mod auth;
pub mod config;
pub mod context;
pub mod cors;
pub mod error;
pub mod healthcheck;
pub mod identity;
pub mod ipfilter;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod router;

use crate::auth::{auth_middleware, identify_middleware, AuthService};
use crate::config::{GatewayConfig, LogFormat};
use crate::cors::{cors_middleware, CorsPolicy};
use crate::error::{GatewayError, Result};
use crate::healthcheck::{health_all_handler, health_handler, HealthChecker};
use crate::ipfilter::{whitelist_middleware, Whitelist};
use crate::metrics::{metrics_handler, track_requests, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{rate_limit_middleware, select_store, RateLimiterService};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router as AxumRouter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Everything the running gateway shares between requests.
///
/// Built once before the listener is bound; nothing in it is swapped while
/// serving.
pub struct GatewayState {
    pub rate_limiter: Arc<RateLimiterService>,
    pub auth: Arc<AuthService>,
    pub whitelist: Arc<Whitelist>,
    pub cors: Arc<CorsPolicy>,
    pub proxy: Arc<ProxyState>,
    pub health: Arc<HealthChecker>,
    pub metrics: Option<MetricsService>,
}

/// Construct the shared state, including the one-time counting store choice
pub async fn build_state(config: &GatewayConfig) -> Result<GatewayState> {
    // The recorder must exist before the store choice is recorded
    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let store = select_store(&config.rate_limiting).await;
    let rate_limiter = RateLimiterService::new(store, &config.rate_limiting);

    Ok(GatewayState {
        rate_limiter: Arc::new(rate_limiter),
        auth: Arc::new(AuthService::new(&config.auth)),
        whitelist: Arc::new(Whitelist::new(&config.rate_limiting.whitelist)),
        cors: Arc::new(config.cors.build_policy()?),
        proxy: Arc::new(ProxyState::from_config(config)?),
        health: Arc::new(HealthChecker::new(&config.services)?),
        metrics,
    })
}

/// Assemble the HTTP application.
///
/// Health and metrics are answered directly. Every other request runs
/// whitelist, identity, rate limiting and the auth gate, in that order,
/// before reaching the proxy. CORS wraps both.
pub fn build_app(state: GatewayState) -> AxumRouter {
    let pipeline = AxumRouter::new()
        .fallback(proxy_handler)
        .with_state(state.proxy)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.whitelist, whitelist_middleware))
                .layer(from_fn_with_state(state.auth.clone(), identify_middleware))
                .layer(from_fn_with_state(state.rate_limiter, rate_limit_middleware))
                .layer(from_fn_with_state(state.auth, auth_middleware)),
        );

    let mut app = AxumRouter::new()
        .route("/health", get(health_handler))
        .route("/health/all", get(health_all_handler))
        .with_state(state.health);

    if let Some(metrics) = state.metrics {
        app = app.merge(
            AxumRouter::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.fallback_service(pipeline)
        .layer(from_fn_with_state(state.cors, cors_middleware))
        .layer(from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    info!("Starting API Gateway");

    let state = build_state(&config).await?;
    info!(
        store = ?state.rate_limiter.store_kind(),
        trust_proxy = config.rate_limiting.trust_proxy,
        whitelisted = config.rate_limiting.whitelist.len(),
        "Traffic control configured"
    );
    let app = build_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GatewayError::Io)?;

    info!("Gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

    info!("Gateway shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "edge_gateway=debug,tower_http=debug".into());

    match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

use crate::config::GatewayConfig;
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::router::Router;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method},
    response::Response,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Proxy handler state
pub struct ProxyState {
    pub router: Router,
    pub client: reqwest::Client,
    pub max_body_bytes: usize,
}

impl ProxyState {
    /// Create a new proxy state
    pub fn new(router: Router, timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            router,
            client,
            max_body_bytes,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let router = Router::new(&config.routes, &config.services)?;
        info!("Loaded {} routes", router.routes().len());

        Self::new(
            router,
            Duration::from_secs(config.server.timeout_secs),
            config.server.max_body_bytes,
        )
    }
}

/// Forward an accepted request to the backend of its route group
pub async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let user_id = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.auth.as_ref())
        .map(|auth| auth.user_id.clone());

    let route_match = state.router.match_route(&path, &method)?;
    let service = route_match.route.service.service_name();
    let backend_url = route_match.build_backend_url(&path, query.as_deref());

    debug!(
        params = ?route_match.params,
        service = service,
        user_id = ?user_id,
        "Route matched"
    );

    let headers = forwarded_headers(req.headers());
    let body_bytes = axum::body::to_bytes(req.into_body(), state.max_body_bytes)
        .await
        .map_err(|e| {
            if exceeded_length_limit(&e) {
                GatewayError::PayloadTooLarge(state.max_body_bytes)
            } else {
                GatewayError::Internal(format!("Failed to read request body: {}", e))
            }
        })?;

    debug!(backend_url = %backend_url, "Forwarding to backend");

    let start = Instant::now();
    let result = send_request(&state.client, method.clone(), headers, body_bytes, &backend_url).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(resp) => {
            info!(
                method = %method,
                path = %path,
                status = %resp.status(),
                backend = service,
                latency_ms = elapsed.as_secs_f64() * 1000.0,
                "Request completed"
            );
            metrics::record_backend_request(service, resp.status().as_u16(), elapsed);
        }
        Err(e) => {
            error!(
                method = %method,
                path = %path,
                error = %e,
                backend = service,
                latency_ms = elapsed.as_secs_f64() * 1000.0,
                "Backend request failed"
            );
            metrics::record_backend_error(service);
        }
    }

    result
}

/// Send request to the backend service, streaming its response back
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    backend_url: &str,
) -> Result<Response> {
    let backend_response = client
        .request(method, backend_url)
        .headers(headers)
        .body(body_bytes)
        .send()
        .await
        .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))?;

    let status = backend_response.status();
    let mut response_headers = HeaderMap::with_capacity(backend_response.headers().len());

    // Every value of a repeated header is kept
    for (name, value) in backend_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_headers.append(name.clone(), value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(backend_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;

    Ok(response)
}

/// Copy of the inbound headers that is safe to replay on a new connection
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound.iter() {
        let name_str = name.as_str();
        // The client computes these for the outbound request
        if is_hop_by_hop_header(name_str) || name_str == "host" || name_str == "content-length" {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    outbound
}

/// Connection-management headers that belong to a single hop
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection" | "keep-alive" | "transfer-encoding"
    )
}

fn exceeded_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

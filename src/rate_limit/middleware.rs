use super::service::RateLimiterService;
use super::types::RateLimitResult;
use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::metrics;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

/// Axum middleware function for rate limiting
///
/// Whitelisted requests pass untouched. Allowed requests get the
/// `X-RateLimit-*` headers on their response; rejected ones get a 429.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterService>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    match limiter.check(&ctx, &method, &path, &headers).await {
        Ok(None) => next.run(request).await,
        Ok(Some(result)) if result.allowed => {
            let response = next.run(request).await;
            add_rate_limit_headers(response, &result)
        }
        Ok(Some(result)) => {
            metrics::record_rate_limit_exceeded(result.tier);
            GatewayError::RateLimited {
                limit: result.limit,
                retry_after: result.reset_after,
            }
            .into_response()
        }
        Err(e) => {
            error!(path = %path, error = %e, "Rate limit check failed");
            e.into_response()
        }
    }
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, result: &RateLimitResult) -> Response {
    let headers = response.headers_mut();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(result.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(result.reset_after));

    response
}

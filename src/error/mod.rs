use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shared rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Rate limit store error: {0}")]
    Store(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited {
        limit: u64,
        retry_after: u64,
    },

    #[error("Service unavailable: {0}")]
    BackendUnreachable(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method {method} not allowed for path {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Invalid route configuration: {0}")]
    InvalidRoute(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BackendUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::InvalidRoute(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Store and internal faults are not
    /// described beyond a generic message.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Store(_)
            | GatewayError::StoreUnavailable(_)
            | GatewayError::Config(_)
            | GatewayError::InvalidRoute(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_) => "Internal server error".to_string(),
            GatewayError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let GatewayError::RateLimited { limit, retry_after } = &self {
            let body = Json(json!({
                "success": false,
                "error": self.client_message(),
                "retry_after": retry_after,
            }));
            let mut response = (status, body).into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", HeaderValue::from(*retry_after));
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u64));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(*retry_after));
            return response;
        }

        let body = Json(json!({
            "success": false,
            "error": self.client_message(),
        }));

        (status, body).into_response()
    }
}

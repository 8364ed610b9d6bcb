use crate::error::{GatewayError, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins (use ["*"] for all origins)
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,
    /// Allow credentials
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
    /// Max age for preflight cache in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "PATCH".to_string(),
        "OPTIONS".to_string(),
    ]
}

fn default_headers() -> Vec<String> {
    vec![
        "Content-Type".to_string(),
        "Authorization".to_string(),
        "X-Requested-With".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            allow_credentials: true,
            max_age_secs: default_max_age(),
        }
    }
}

/// Header values of a CORS policy, checked and encoded once at startup
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<HeaderValue>,
    methods: HeaderValue,
    headers: HeaderValue,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsConfig {
    /// Build a [`CorsPolicy`] from this configuration
    pub fn build_policy(&self) -> Result<CorsPolicy> {
        let any_origin = self.allowed_origins.iter().any(|o| o == "*");

        let origins = self
            .allowed_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .map(|o| HeaderValue::from_str(o))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Config(format!("Invalid CORS origin value: {}", e)))?;

        if origins.is_empty() && !any_origin {
            return Err(GatewayError::Config(
                "At least one CORS origin is required".to_string(),
            ));
        }

        // Browsers refuse credentialed responses with a wildcard origin
        if origins.is_empty() && self.allow_credentials {
            return Err(GatewayError::Config(
                "CORS wildcard origin cannot be combined with allow_credentials".to_string(),
            ));
        }

        for method in &self.allowed_methods {
            Method::from_bytes(method.as_bytes())
                .map_err(|e| GatewayError::Config(format!("Invalid CORS method: {}", e)))?;
        }
        for name in &self.allowed_headers {
            name.parse::<header::HeaderName>()
                .map_err(|e| GatewayError::Config(format!("Invalid CORS header name: {}", e)))?;
        }

        let joined = |items: &[String]| {
            HeaderValue::from_str(&items.join(", "))
                .map_err(|e| GatewayError::Config(format!("Invalid CORS value: {}", e)))
        };

        debug!(
            origins = ?self.allowed_origins,
            credentials = self.allow_credentials,
            "CORS: Configured policy"
        );

        Ok(CorsPolicy {
            origins,
            methods: joined(&self.allowed_methods)?,
            headers: joined(&self.allowed_headers)?,
            allow_credentials: self.allow_credentials,
            max_age: HeaderValue::from(self.max_age_secs),
        })
    }
}

impl CorsPolicy {
    /// `Access-Control-Allow-Origin` value for a request from `origin`.
    ///
    /// A listed origin is echoed back; otherwise the first configured origin
    /// is sent, or `*` when only the wildcard is configured.
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> HeaderValue {
        if let Some(origin) = origin {
            if self.origins.iter().any(|allowed| allowed == origin) {
                return origin.clone();
            }
        }

        match self.origins.first() {
            Some(first) => first.clone(),
            None => HeaderValue::from_static("*"),
        }
    }

    /// Write this policy's headers into `headers`
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            self.allow_origin(origin),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if !self.origins.is_empty() {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
}

/// Outermost stage: decorate every response and answer `OPTIONS` directly
pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();

    if request.method() == Method::OPTIONS {
        debug!(path = %request.uri().path(), "Answering preflight request");
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        policy.apply(origin.as_ref(), headers);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, policy.max_age.clone());
        return response;
    }

    let mut response = next.run(request).await;
    policy.apply(origin.as_ref(), response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: &CorsConfig) -> Router {
        let policy = Arc::new(config.build_policy().unwrap());
        Router::new()
            .route("/resource", get(|| async { "ok" }))
            .layer(from_fn_with_state(policy, cors_middleware))
    }

    #[test]
    fn test_default_cors_config() {
        let config = CorsConfig::default();
        assert_eq!(config.allowed_origins, vec!["http://localhost:5173"]);
        assert!(config.allowed_methods.contains(&"PATCH".to_string()));
        assert!(config.allowed_headers.contains(&"X-Requested-With".to_string()));
        assert!(config.allow_credentials);
    }

    #[test]
    fn test_build_policy_rejects_invalid_values() {
        let config = CorsConfig {
            allowed_methods: vec!["GET POST".to_string()],
            ..Default::default()
        };
        assert!(config.build_policy().is_err());

        let config = CorsConfig {
            allowed_headers: vec!["Bad Header".to_string()],
            ..Default::default()
        };
        assert!(config.build_policy().is_err());

        let config = CorsConfig {
            allowed_origins: vec![],
            ..Default::default()
        };
        assert!(config.build_policy().is_err());
    }

    #[test]
    fn test_allow_origin_selection() {
        let policy = CorsConfig {
            allowed_origins: vec![
                "https://app.example.com".to_string(),
                "https://admin.example.com".to_string(),
            ],
            ..Default::default()
        }
        .build_policy()
        .unwrap();

        let admin = HeaderValue::from_static("https://admin.example.com");
        assert_eq!(policy.allow_origin(Some(&admin)), admin);

        let other = HeaderValue::from_static("https://evil.example.com");
        assert_eq!(policy.allow_origin(Some(&other)), "https://app.example.com");
        assert_eq!(policy.allow_origin(None), "https://app.example.com");
    }

    #[test]
    fn test_wildcard_origin() {
        let policy = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
            ..Default::default()
        }
        .build_policy()
        .unwrap();

        assert_eq!(policy.allow_origin(None), "*");
    }

    #[test]
    fn test_wildcard_with_credentials_rejected() {
        let config = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
            ..Default::default()
        };
        assert!(matches!(config.build_policy(), Err(GatewayError::Config(_))));

        // A listed origin is echoed, so credentials stay allowed
        let config = CorsConfig {
            allowed_origins: vec!["*".to_string(), "https://app.example.com".to_string()],
            allow_credentials: true,
            ..Default::default()
        };
        assert!(config.build_policy().is_ok());
    }

    #[tokio::test]
    async fn test_options_answered_without_reaching_handler() {
        let response = app(&CorsConfig::default())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/not-routed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "GET, POST, PUT, DELETE, PATCH, OPTIONS"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_regular_responses_are_decorated() {
        let response = app(&CorsConfig::default())
            .oneshot(Request::builder().uri("/resource").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
                .unwrap(),
            "Content-Type, Authorization, X-Requested-With"
        );
    }
}

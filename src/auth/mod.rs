//! Bearer token authentication
//!
//! Two stages share one [`AuthService`]: the identity stage attaches an
//! [`AuthContext`] whenever a valid token is present and never rejects, and
//! the gate rejects protected requests that reach it without one.

pub mod jwt;
pub mod middleware;

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};
use crate::metrics;
use axum::http::HeaderMap;
use tracing::{debug, warn};

pub use jwt::{Claims, JwtValidator, UserId};
pub use middleware::{auth_middleware, identify_middleware};

/// Identity of a verified caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub role: String,
    pub email: String,
}

/// Authentication service shared by the identity stage and the gate
pub struct AuthService {
    validator: JwtValidator,
    public_paths: Vec<String>,
}

impl AuthService {
    /// Create a new authentication service from configuration
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            validator: JwtValidator::new(&config.jwt_secret),
            public_paths: config.public_paths.clone(),
        }
    }

    /// Paths that bypass the gate
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|public| public == path)
    }

    /// Verify the bearer token in `headers`
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext> {
        self.validator.validate(headers).map(AuthContext::from)
    }

    /// The caller's identity when a valid token is present
    pub fn identify(&self, headers: &HeaderMap) -> Option<AuthContext> {
        if !headers.contains_key(axum::http::header::AUTHORIZATION) {
            return None;
        }

        match self.authenticate(headers) {
            Ok(auth) => Some(auth),
            Err(e) => {
                debug!(error = %e, "Ignoring unusable credentials before rate limiting");
                None
            }
        }
    }

    /// Decide whether a request may proceed to the backend.
    ///
    /// Public paths pass unchanged. An identity attached by an earlier stage
    /// is reused; otherwise the token is verified here.
    pub fn authorize(
        &self,
        ctx: RequestContext,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<RequestContext> {
        if self.is_public(path) {
            debug!(path = %path, "Public route, skipping authentication");
            return Ok(ctx);
        }

        if ctx.auth.is_some() {
            return Ok(ctx);
        }

        match self.authenticate(headers) {
            Ok(auth) => {
                debug!(user_id = %auth.user_id, path = %path, "Request authenticated");
                Ok(ctx.with_auth(auth))
            }
            Err(e) => {
                if let GatewayError::Unauthorized(reason) = &e {
                    warn!(path = %path, reason = %reason, "Authentication failed");
                    metrics::record_auth_failure(reason);
                }
                Err(e)
            }
        }
    }
}

use super::AuthContext;
use crate::error::{GatewayError, Result};
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const MISSING_HEADER: &str = "Authorization header required";
pub const MISSING_BEARER: &str = "Bearer token required";
pub const INVALID_TOKEN: &str = "Invalid or expired token";

/// User identifier as issued by the auth service (numeric today, but
/// string ids are accepted too)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(id) => write!(f, "{}", id),
            UserId::Text(id) => f.write_str(id),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,
    #[serde(default)]
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id.to_string(),
            role: claims.role,
            email: claims.email,
        }
    }
}

/// JWT validator for HMAC-signed tokens
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &SecretString) -> Self {
        // Any HMAC variant, nothing else; the decoder rejects `none`
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Validate the bearer token carried in `headers`
    pub fn validate(&self, headers: &HeaderMap) -> Result<Claims> {
        let token = Self::extract_token(headers)?;
        self.decode(token)
    }

    /// Verify signature and expiry of a raw token
    pub fn decode(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token validation failed");
                GatewayError::Unauthorized(INVALID_TOKEN.to_string())
            })
    }

    /// Extract JWT token from Authorization header
    pub fn extract_token(headers: &HeaderMap) -> Result<&str> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| GatewayError::Unauthorized(MISSING_HEADER.to_string()))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| GatewayError::Unauthorized(INVALID_TOKEN.to_string()))?;
        if auth_str.trim().is_empty() {
            return Err(GatewayError::Unauthorized(MISSING_HEADER.to_string()));
        }

        // A bare "Bearer" is what arrives once trailing whitespace is trimmed
        let token = if auth_str.trim_end() == "Bearer" {
            ""
        } else {
            auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim()
        };
        if token.is_empty() {
            return Err(GatewayError::Unauthorized(MISSING_BEARER.to_string()));
        }

        Ok(token)
    }
}

//! Per-request state shared between pipeline stages
//!
//! Stages do not reach into each other. Each one reads the
//! [`RequestContext`] from the request extensions, derives a new value with
//! what it learned, and attaches it for the stages after it.

use crate::auth::AuthContext;
use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// What earlier stages learned about a request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Transport peer address, absent when the server was not started with
    /// connect info
    pub peer: Option<SocketAddr>,
    /// Set by the whitelist stage
    pub skip_rate_limit: bool,
    /// Set once a bearer token has been verified
    pub auth: Option<AuthContext>,
}

impl RequestContext {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            ..Default::default()
        }
    }

    /// The context attached to `request`, or a fresh one built from its
    /// connect info
    pub fn from_request(request: &Request) -> Self {
        if let Some(ctx) = request.extensions().get::<RequestContext>() {
            return ctx.clone();
        }

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::new(peer)
    }

    /// Mark the request as exempt from rate limiting
    pub fn exempt(self) -> Self {
        Self {
            skip_rate_limit: true,
            ..self
        }
    }

    /// Record the verified identity of the caller
    pub fn with_auth(self, auth: AuthContext) -> Self {
        Self {
            auth: Some(auth),
            ..self
        }
    }

    /// Store this context on the request, replacing any previous one
    pub fn attach(self, request: &mut Request) {
        request.extensions_mut().insert(self);
    }
}

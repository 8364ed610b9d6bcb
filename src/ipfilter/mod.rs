use crate::context::RequestContext;
use crate::identity::resolve_client_ip;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Peer addresses exempt from rate limiting.
///
/// Membership is exact address equality; ranges are not supported.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    addresses: HashSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses: HashSet<String> = entries
            .into_iter()
            .map(|entry| canonical(entry.as_ref().trim()))
            .filter(|entry| !entry.is_empty())
            .collect();

        if !addresses.is_empty() {
            info!(count = addresses.len(), "IP whitelist loaded");
        }

        Self { addresses }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.addresses.contains(ip)
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Mark `ctx` exempt when its transport peer is whitelisted.
    ///
    /// Forwarding headers are never consulted here, whatever the gateway's
    /// proxy trust setting.
    pub fn apply(&self, ctx: RequestContext) -> RequestContext {
        if self.is_empty() || ctx.peer.is_none() {
            return ctx;
        }

        let ip = resolve_client_ip(&Default::default(), ctx.peer, false);
        if self.contains(&ip) {
            debug!(client_ip = %ip, "Whitelisted client, rate limiting disabled");
            ctx.exempt()
        } else {
            ctx
        }
    }
}

/// Write addresses the way the peer address is rendered, so `::1` and
/// `0:0:0:0:0:0:0:1` are the same entry
fn canonical(entry: &str) -> String {
    entry
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| entry.to_string())
}

/// Axum middleware marking whitelisted requests
pub async fn whitelist_middleware(
    State(whitelist): State<Arc<Whitelist>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !whitelist.is_empty() {
        let ctx = whitelist.apply(RequestContext::from_request(&request));
        ctx.attach(&mut request);
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body, extract::ConnectInfo, http::StatusCode, middleware::from_fn_with_state,
        routing::get, Extension, Router,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn ctx(peer: &str) -> RequestContext {
        RequestContext::new(Some(peer.parse::<SocketAddr>().unwrap()))
    }

    #[test]
    fn test_exact_match_only() {
        let whitelist = Whitelist::new(["192.168.1.1"]);

        assert!(whitelist.contains("192.168.1.1"));
        assert!(!whitelist.contains("192.168.1.10"));
        assert!(!whitelist.contains("192.168.1.0/24"));
    }

    #[test]
    fn test_apply_marks_whitelisted_peer() {
        let whitelist = Whitelist::new(["10.0.0.5", " 10.0.0.6 "]);

        assert!(whitelist.apply(ctx("10.0.0.5:4000")).skip_rate_limit);
        assert!(whitelist.apply(ctx("10.0.0.6:4000")).skip_rate_limit);
        assert!(!whitelist.apply(ctx("10.0.0.7:4000")).skip_rate_limit);
    }

    #[test]
    fn test_ipv6_entries_are_canonical() {
        let whitelist = Whitelist::new(["0:0:0:0:0:0:0:1"]);
        assert!(whitelist.apply(ctx("[::1]:4000")).skip_rate_limit);
    }

    #[test]
    fn test_unknown_peer_is_not_whitelisted() {
        let whitelist = Whitelist::new(["unknown"]);
        assert!(!whitelist.apply(RequestContext::new(None)).skip_rate_limit);
    }

    #[test]
    fn test_empty_whitelist_is_noop() {
        let whitelist = Whitelist::new(Vec::<String>::new());
        assert!(whitelist.is_empty());
        assert!(!whitelist.apply(ctx("10.0.0.5:4000")).skip_rate_limit);
    }

    #[tokio::test]
    async fn test_forwarded_header_does_not_whitelist() {
        let whitelist = Arc::new(Whitelist::new(["1.2.3.4"]));
        let app = Router::new()
            .route(
                "/probe",
                get(|ctx: Option<Extension<RequestContext>>| async move {
                    match ctx {
                        Some(Extension(ctx)) if ctx.skip_rate_limit => "exempt",
                        _ => "counted",
                    }
                }),
            )
            .layer(from_fn_with_state(whitelist, whitelist_middleware));

        let mut request = Request::builder()
            .uri("/probe")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-real-ip", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.50:1234".parse::<SocketAddr>().unwrap()));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"counted");
    }
}

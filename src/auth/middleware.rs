use super::AuthService;
use crate::context::RequestContext;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Attach the caller's identity when the request carries a valid token.
/// Never rejects.
pub async fn identify_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(identity) = auth.identify(request.headers()) {
        RequestContext::from_request(&request)
            .with_auth(identity)
            .attach(&mut request);
    }

    next.run(request).await
}

/// Reject protected requests without a valid token
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);

    match auth.authorize(ctx, request.uri().path(), request.headers()) {
        Ok(ctx) => {
            ctx.attach(&mut request);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use axum::{
        body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Extension,
        Router,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        let auth = Arc::new(AuthService::new(&AuthConfig::default()));
        Router::new()
            .route(
                "/api/me",
                get(|Extension(ctx): Extension<RequestContext>| async move {
                    ctx.auth.map(|a| a.user_id).unwrap_or_default()
                }),
            )
            .route("/auth/login", get(|| async { "login" }))
            .layer(from_fn_with_state(auth, auth_middleware))
    }

    #[tokio::test]
    async fn test_gate_rejects_missing_token() {
        let response = app()
            .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_gate_lets_public_routes_through() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/auth/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request Log    │ ← request id, scoped logger, X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ├──────────────────────────┐
//!          ▼                          ▼
//! ┌──────────────────┐       ┌──────────────────┐
//! │  Basic Auth      │ ← 401 │  public routes,  │
//! │  (protected only)│       │  static files    │
//! └────────┬─────────┘       └──────────────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/_/version`, `/_/stats`, `/_/echo` - public endpoints
//! - `/_/env`, `/_/logs`, `/_/crash`, `/_/alloc`, `/_/upload` - protected
//!   when credentials are configured
//! - everything else - static files from the configured directory

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{MethodRouter, delete, get, post};
use tower_http::services::ServeDir;
use tracing::info;

use crate::handlers;
use crate::middleware::{BasicAuthLayer, RequestLogLayer};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Authentication wraps the protected group only, and only when
/// `config.credentials` is set. Request logging wraps everything, including
/// the static file fallback.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    // =========================================================================
    // Public endpoints
    // =========================================================================
    let public = Router::new()
        .route("/_/version", fixed(get(handlers::version)))
        .route("/_/stats", fixed(get(handlers::stats)))
        .route(
            "/_/echo",
            fixed(get(handlers::echo).post(handlers::echo)),
        );

    // =========================================================================
    // Protected endpoints
    // =========================================================================
    let mut protected = Router::new()
        .route("/_/env", fixed(get(handlers::env)))
        .route("/_/logs", fixed(get(handlers::logs)))
        .route("/_/crash", fixed(delete(handlers::crash)))
        .route("/_/alloc", fixed(post(handlers::alloc)))
        .route(
            "/_/upload",
            fixed(post(handlers::upload).layer(DefaultBodyLimit::max(config.upload_limit))),
        );

    match &config.credentials {
        Some(credentials) => {
            info!(username = %credentials.username, "Basic authentication enabled");
            protected = protected.route_layer(BasicAuthLayer::new(credentials.clone()));
        }
        None => info!("Basic authentication disabled, protected endpoints are open"),
    }

    // =========================================================================
    // Static files and the outermost layer
    // =========================================================================
    info!(static_dir = %config.static_dir.display(), "Serving static files");
    let static_files = ServeDir::new(&config.static_dir);

    public
        .merge(protected)
        .fallback_service(static_files)
        .layer(RequestLogLayer::new())
        .with_state(state)
}

/// Answer 501 for every method the route does not register.
fn fixed(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.fallback(handlers::method_not_implemented)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    use crate::config::{Config, Credentials};
    use crate::logging::{LogRecord, LogSink, LogTee};
    use crate::middleware::REQUEST_ID_HEADER;

    struct NullSink;

    impl LogSink for NullSink {
        fn write_record(&self, _record: &LogRecord) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn app(static_dir: &Path, credentials: Option<Credentials>) -> Router {
        let config = Config {
            static_dir: static_dir.to_path_buf(),
            credentials,
            ..Config::default()
        };
        build_router(AppState::new(config, Arc::new(LogTee::new(NullSink))))
    }

    async fn call(app: Router, req: Request<Body>) -> Response {
        app.oneshot(req).await.unwrap()
    }

    async fn body_of(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_version_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(
            app(dir.path(), Some(Credentials::new("admin", "pw"))),
            get_req("/_/version"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(body_of(response).await.starts_with("Version: "));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(
            app(dir.path(), None),
            Request::put("/_/version").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            body_of(response).await,
            "method PUT not implemented for this path\n"
        );
    }

    #[tokio::test]
    async fn test_crash_requires_delete() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(app(dir.path(), None), get_req("/_/crash")).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_protected_route_requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(
            app(dir.path(), Some(Credentials::new("admin", "pw"))),
            get_req("/_/env"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            r#"Basic realm="Restricted""#
        );
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_protected_route_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::get("/_/logs")
            .header(
                AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("admin:pw")),
            )
            .body(Body::empty())
            .unwrap();

        let response = call(app(dir.path(), Some(Credentials::new("admin", "pw"))), req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_route_open_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(app(dir.path(), None), get_req("/_/env")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_echo_accepts_get_and_post() {
        let dir = tempfile::tempdir().unwrap();

        let response = call(app(dir.path(), None), get_req("/_/echo?x=1")).await;
        assert_eq!(response.status(), StatusCode::ALREADY_REPORTED);
        assert!(body_of(response).await.starts_with("GET /_/echo?x=1 HTTP/1.1\r\n"));

        let response = call(
            app(dir.path(), None),
            Request::post("/_/echo").body(Body::from("payload")).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ALREADY_REPORTED);
        assert!(body_of(response).await.ends_with("\r\n\r\npayload"));
    }

    #[tokio::test]
    async fn test_static_files_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "static content").unwrap();

        let response = call(app(dir.path(), None), get_req("/hello.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(body_of(response).await, "static content");

        let response = call(app(dir.path(), None), get_req("/missing.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_alloc_validation_through_router() {
        let dir = tempfile::tempdir().unwrap();
        let response = call(
            app(dir.path(), None),
            Request::post("/_/alloc?size=lots").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await, "lots: invalid size\n");
    }
}

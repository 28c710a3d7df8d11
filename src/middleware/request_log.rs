//! Request context and logging middleware.
//!
//! # Features
//!
//! - Generates a short random request ID (`quick_id(6)`, 8 URL-safe chars)
//! - Creates a `request` span carrying the ID; the span is the request's
//!   scoped logger, so every event emitted while handling the request is
//!   tagged with `id`
//! - Stores a [`RequestContext`] in the request extensions for downstream
//!   middleware and handlers
//! - Logs `Request received` before and `Request finished` (with duration)
//!   after the rest of the stack runs
//! - Adds `X-Request-Id` to all responses
//!
//! # Ordering
//!
//! This layer must be the outermost one. The authentication middleware
//! reads [`RequestContext`] and fails closed with a 500 when it is missing.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::header::HeaderValue;
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::{Instrument, Span, info, info_span};

use super::ip::resolve_client_addr;
use crate::metrics;
use crate::utils::quick_id;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Number of random bytes in a request ID.
const REQUEST_ID_BYTES: usize = 6;

/// Per-request identifier and scoped logger.
///
/// Enter the span (or `.instrument()` a future with it) to tag log records
/// with the request ID. Events emitted inside a handler already run within
/// it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: String,
    pub span: Span,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error: missing request context",
        ))
    }
}

/// Request logging layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestLogLayer;

impl RequestLogLayer {
    /// Create a new request logging layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService { inner }
    }
}

/// Request logging service wrapper.
#[derive(Clone)]
pub struct RequestLogService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestLogService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let start = Instant::now();
        let id = quick_id(REQUEST_ID_BYTES);
        let span = info_span!("request", id = %id);

        let method = req.method().clone();
        span.in_scope(|| {
            info!(
                method = %method,
                url = %req.uri().path(),
                client_addr = %resolve_client_addr(&req),
                "Request received"
            );
        });

        req.extensions_mut().insert(RequestContext {
            id: id.clone(),
            span: span.clone(),
        });

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).instrument(span.clone()).await?;

            let elapsed = start.elapsed();
            span.in_scope(|| info!(duration = ?elapsed, "Request finished"));

            if let Ok(value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            metrics::record_request(
                method.as_str(),
                response.status().as_u16(),
                elapsed.as_secs_f64(),
            );

            Ok(response)
        })
    }
}

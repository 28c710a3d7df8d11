//! HTTP Basic Authentication middleware.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: username and password are both compared
//!   with `subtle`, and the two results are combined without short-circuit
//! - **No password logging**: failed attempts log the attempted username only
//!
//! # Usage
//!
//! Applied with `route_layer` to the protected routes only, and only when
//! credentials are configured:
//!
//! ```bash
//! curl -u admin:secret http://localhost:8080/_/env
//! ```
//!
//! # Ordering
//!
//! Must run inside [`RequestLogLayer`](super::RequestLogLayer): failures are
//! logged through the request's scoped logger. A request without a
//! [`RequestContext`] is answered with 500 before credentials are checked.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::warn;

use super::request_log::RequestContext;
use crate::config::Credentials;
use crate::error::AppError;
use crate::metrics;

/// Challenge sent with every 401.
pub const BASIC_CHALLENGE: &str = r#"Basic realm="Restricted""#;

/// Logged when the request carries no usable `Authorization` header.
pub const REASON_NO_CREDENTIALS: &str = "no credentials provided";

/// Logged when the supplied username or password does not match.
pub const REASON_INVALID_CREDENTIALS: &str = "invalid username and/or password";

/// Basic Auth layer.
#[derive(Clone)]
pub struct BasicAuthLayer {
    credentials: Arc<Credentials>,
}

impl BasicAuthLayer {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }
}

impl<S> Layer<S> for BasicAuthLayer {
    type Service = BasicAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BasicAuthService {
            inner,
            credentials: self.credentials.clone(),
        }
    }
}

/// Basic Auth service wrapper.
#[derive(Clone)]
pub struct BasicAuthService<S> {
    inner: S,
    credentials: Arc<Credentials>,
}

impl<S> Service<Request<Body>> for BasicAuthService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let credentials = self.credentials.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
                return Ok(missing_context_response());
            };

            match extract_basic_credentials(&req) {
                Some((user, pass)) if credentials_match(&credentials, &user, &pass) => {
                    inner.call(req).await
                }
                Some((user, _)) => {
                    warn!(
                        parent: &ctx.span,
                        reason = REASON_INVALID_CREDENTIALS,
                        user = %user,
                        "Authentication failed"
                    );
                    metrics::record_auth_failure(REASON_INVALID_CREDENTIALS);
                    Ok(unauthorized_response())
                }
                None => {
                    warn!(
                        parent: &ctx.span,
                        reason = REASON_NO_CREDENTIALS,
                        "Authentication failed"
                    );
                    metrics::record_auth_failure(REASON_NO_CREDENTIALS);
                    Ok(unauthorized_response())
                }
            }
        })
    }
}

/// Extract `(username, password)` from an `Authorization: Basic` header.
///
/// The scheme is case-insensitive and the decoded pair is split at the
/// first `:`, so passwords may contain colons. Anything undecodable counts
/// as no credentials.
fn extract_basic_credentials<B>(req: &Request<B>) -> Option<(String, String)> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;

    Some((user.to_string(), pass.to_string()))
}

/// Compare both fields in constant time, without short-circuiting.
fn credentials_match(expected: &Credentials, user: &str, pass: &str) -> bool {
    let user_ok = expected.username.as_bytes().ct_eq(user.as_bytes());
    let pass_ok = expected.password.as_bytes().ct_eq(pass.as_bytes());
    (user_ok & pass_ok).into()
}

/// Build an unauthorized (401) response with a Basic challenge.
fn unauthorized_response() -> Response<Body> {
    let mut response = AppError::Unauthorized("Unauthorized".to_string()).into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static(BASIC_CHALLENGE),
    );
    response
}

fn missing_context_response() -> Response<Body> {
    AppError::Internal("Internal server error: missing request context".to_string())
        .into_response()
}

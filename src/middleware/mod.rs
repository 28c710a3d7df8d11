//! HTTP middleware for request observability and access control.
//!
//! - **Request logging**: request ID, scoped logger, received/finished events
//!   with duration
//! - **Basic Auth**: constant-time credential check on protected routes
//! - **Client address**: proxy-header aware resolution used for logging
//!
//! # Architecture
//!
//! ```text
//! Request → RequestLog → [BasicAuth] → Handler → Response
//!              ↓              ↓
//!       RequestContext    401 Unauthorized
//!       X-Request-Id      (WWW-Authenticate: Basic)
//! ```
//!
//! Bandwidth limiting happens below HTTP, in [`crate::listener`].

pub mod auth;
pub mod ip;
pub mod request_log;

pub use auth::BasicAuthLayer;
pub use ip::{UNKNOWN_IP, resolve_client_addr, strip_port};
pub use request_log::{REQUEST_ID_HEADER, RequestContext, RequestLogLayer};

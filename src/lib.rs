//! # webprobe
//!
//! A diagnostic HTTP server for exercising deployments: it reports on
//! itself, misbehaves on request and throttles its own socket.
//!
//! - **Diagnostics**: version, environment, runtime stats, log replay, echo
//! - **Fault injection**: delayed crash with a chosen exit code, memory churn
//! - **Uploads**: multipart upload into the static tree with a SHA-256 receipt
//! - **Bandwidth cap**: one read and one write budget shared by every
//!   connection, enforced at the listener
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            ThrottledListener (global byte budget)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request Log → Basic Auth on protected routes)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (diagnostics, crash, alloc, echo, upload, static) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LogTee: console stream + in-memory replay buffer           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webprobe::{AppState, ClientAddr, Config, ThrottledListener, build_router, init_logging};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let logs = init_logging(config.log_level);
//!     let state = AppState::new(config, logs);
//!
//!     let listener = ThrottledListener::bind(state.config.listen, state.throttle.clone()).await?;
//!     let app = build_router(state).into_make_service_with_connect_info::<ClientAddr>();
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Credentials default to `random` and are generated at startup:
//! ```bash
//! WEBPROBE_USERNAME=admin WEBPROBE_PASSWORD=secret cargo run
//! ```
//!
//! Disable authentication entirely:
//! ```bash
//! WEBPROBE_USERNAME= cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod units;
pub mod utils;

// Re-exports for convenience
pub use config::{Config, Credentials};
pub use error::{AppError, AppResult};
pub use listener::{BandwidthLimit, ClientAddr, Throttle, ThrottledListener};
pub use logging::{LogTee, init_logging};
pub use routes::build_router;
pub use state::AppState;

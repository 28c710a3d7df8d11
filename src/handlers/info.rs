//! Read-only diagnostic endpoints.
//!
//! # Endpoints
//!
//! - `GET /_/version` - Application version
//! - `GET /_/env` - Environment of the server process (auth)
//! - `GET /_/stats` - Uptime, runtime, memory and bandwidth statistics
//! - `GET /_/logs` - Every log record since startup (auth)
//!
//! All responses are plain text.

use std::fmt::Write as _;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use chrono::Local;
use tracing::instrument;

use crate::error::AppResult;
use crate::state::AppState;
use crate::units::{format_bytes, format_duration};

const TEXT_PLAIN: [(axum::http::HeaderName, &str); 1] =
    [(CONTENT_TYPE, "text/plain; charset=utf-8")];

/// Version endpoint.
///
/// ```text
/// Version: 0.1.0
/// ```
#[instrument(skip_all)]
pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    (TEXT_PLAIN, format!("Version: {}\n", state.config.version))
}

/// Environment variables of the server process, one `\tKEY=VALUE` per line.
#[instrument(skip_all)]
pub async fn env() -> impl IntoResponse {
    let mut body = String::from("Environment Variables:\n");
    for (key, value) in std::env::vars_os() {
        let _ = writeln!(
            body,
            "\t{}={}",
            key.to_string_lossy(),
            value.to_string_lossy()
        );
    }
    (TEXT_PLAIN, body)
}

/// Process statistics.
///
/// ```text
/// Process runtime statistics:
///     Uptime: 1m 2s 500ms (current time: ..., process start time: ...)
///     runtime workers = 8
///     alive tasks = 3
///     ...
/// ```
#[instrument(skip_all)]
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let now = Local::now();
    let runtime = tokio::runtime::Handle::current().metrics();
    let throttle = &state.throttle;

    let mut body = String::from("Process runtime statistics:\n");
    let _ = writeln!(
        body,
        "\tUptime: {} (current time: {}, process start time: {})",
        format_duration(state.started_at.elapsed()),
        now.format("%Y-%m-%d %H:%M:%S%.3f %:z"),
        state.started_wall.format("%Y-%m-%d %H:%M:%S%.3f %:z"),
    );
    let _ = writeln!(body, "\truntime workers = {}", runtime.num_workers());
    let _ = writeln!(body, "\talive tasks = {}", runtime.num_alive_tasks());
    let _ = writeln!(body, "\tmemory churn tasks = {}", state.churn_tasks());

    match memory_stats::memory_stats() {
        Some(usage) => {
            let _ = writeln!(
                body,
                "\tmemory physical = {} ({})",
                usage.physical_mem,
                format_bytes(usage.physical_mem as u64)
            );
            let _ = writeln!(
                body,
                "\tmemory virtual = {} ({})",
                usage.virtual_mem,
                format_bytes(usage.virtual_mem as u64)
            );
        }
        None => {
            let _ = writeln!(body, "\tmemory = unavailable");
        }
    }

    let _ = writeln!(body, "\tbandwidth limit = {}", throttle.limit());
    let _ = writeln!(
        body,
        "\tbytes read = {} ({})",
        throttle.bytes_read(),
        format_bytes(throttle.bytes_read())
    );
    let _ = writeln!(
        body,
        "\tbytes written = {} ({})",
        throttle.bytes_written(),
        format_bytes(throttle.bytes_written())
    );

    (TEXT_PLAIN, body)
}

/// Replay every buffered log record.
#[instrument(skip_all)]
pub async fn logs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let mut body = Vec::new();
    state.logs.flush(&mut body)?;
    Ok((TEXT_PLAIN, body))
}

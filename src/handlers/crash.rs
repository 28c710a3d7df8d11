//! Fault injection: terminate the process on request.
//!
//! `DELETE /_/crash?areYouSure=YesIAmSure&exitCode=N`
//!
//! The confirmation token must match exactly. On success the response is
//! sent first and the process exits with `N` (default 77) after a grace
//! delay, so the client sees the answer.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{Instrument, Span, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Required value of `areYouSure`.
pub const CONFIRMATION_TOKEN: &str = "YesIAmSure";

/// Exit code used when `exitCode` is absent.
pub const DEFAULT_EXIT_CODE: i32 = 77;

const REFUSAL: &str = "I'm sorry, Dave. I'm afraid I can't do that.";
const FAREWELL: &str = "Dave, this conversation can serve no purpose anymore. Good-bye.";

#[derive(Debug, Deserialize)]
pub struct CrashParams {
    #[serde(rename = "areYouSure")]
    are_you_sure: Option<String>,
    #[serde(rename = "exitCode")]
    exit_code: Option<String>,
}

#[instrument(skip_all)]
pub async fn crash(
    State(state): State<AppState>,
    Query(params): Query<CrashParams>,
) -> AppResult<impl IntoResponse> {
    if params.are_you_sure.as_deref() != Some(CONFIRMATION_TOKEN) {
        return Err(AppError::NotAcceptable(REFUSAL.to_string()));
    }

    let exit_code = match params.exit_code {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| AppError::BadRequest(format!("{raw}: invalid exit code")))?,
        None => DEFAULT_EXIT_CODE,
    };

    let grace = state.config.crash_grace;
    warn!(exit_code, grace = ?grace, "Crash requested, exiting after grace period");

    tokio::spawn(
        async move {
            tokio::time::sleep(grace).await;
            warn!(exit_code, "Exiting now");
            state.exit(exit_code);
        }
        .instrument(Span::current()),
    );

    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{FAREWELL}\n"),
    ))
}

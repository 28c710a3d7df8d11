//! Memory pressure endpoint.
//!
//! `POST /_/alloc?size=<bytes>&delay=<duration>` allocates `size` bytes,
//! fills them with random data and hands the buffer to a churn task that
//! keeps rewriting it for the rest of the process lifetime. Sizes use the
//! human byte notation (`64MB`, `1.5GiB`), delays the duration notation of
//! [`parse_duration`] (`200ms`, `1m30s`, `1.5s`).

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::state::AppState;
use crate::units::{format_bytes, parse_bytes, parse_duration};

/// Churn delay used when `delay` is absent.
pub const DEFAULT_CHURN_DELAY: Duration = Duration::from_millis(200);

/// Bytes rewritten between two churn sleeps.
const CHURN_STRIDE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct AllocParams {
    size: Option<String>,
    delay: Option<String>,
}

#[instrument(skip_all)]
pub async fn alloc(
    State(state): State<AppState>,
    Query(params): Query<AllocParams>,
) -> AppResult<impl IntoResponse> {
    let raw_size = params
        .size
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("allocation size must be set".to_string()))?;
    let size = parse_bytes(&raw_size)
        .map_err(|_| AppError::BadRequest(format!("{raw_size}: invalid size")))?;

    let delay = match params.delay.filter(|d| !d.is_empty()) {
        Some(raw) => parse_duration(&raw)
            .map_err(|_| AppError::BadRequest(format!("{raw}: invalid delay")))?,
        None => DEFAULT_CHURN_DELAY,
    };

    let len = usize::try_from(size)
        .map_err(|_| AppError::Internal(format!("cannot allocate {size} bytes")))?;

    let buffer = tokio::task::spawn_blocking(move || allocate_random(len))
        .await
        .map_err(|e| AppError::Internal(format!("allocation task failed: {e}")))??;

    info!(
        size,
        human = %format_bytes(size),
        delay = ?delay,
        "Memory allocated, starting churn"
    );

    state.spawn_churn(churn(buffer, delay));
    metrics::record_churn_task_started();

    Ok((
        StatusCode::CREATED,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        "memory allocated\n",
    ))
}

/// Allocate `len` bytes of random data, reporting allocation failure
/// instead of aborting.
fn allocate_random(len: usize) -> AppResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| AppError::Internal(format!("cannot allocate {len} bytes: {e}")))?;
    buffer.resize(len, 0);
    rand::rng().fill_bytes(&mut buffer);
    Ok(buffer)
}

/// Rewrite `buffer` byte by byte forever.
///
/// The loop is silent: anything logged here would land in the replay
/// buffer once per pass for the rest of the process lifetime.
async fn churn(mut buffer: Vec<u8>, delay: Duration) {
    if buffer.is_empty() {
        // Nothing to rewrite, hold the (empty) allocation without spinning
        return std::future::pending().await;
    }

    let mut rng = SmallRng::from_rng(&mut rand::rng());
    loop {
        pause(delay).await;
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = rng.random();
            if i % CHURN_STRIDE == 0 {
                pause(delay).await;
            }
        }
    }
}

/// Sleep for `delay`, or just give other tasks a turn when it is zero.
async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::to_bytes;

    use crate::config::Config;
    use crate::logging::{LogRecord, LogSink, LogTee};

    struct NullSink;

    impl LogSink for NullSink {
        fn write_record(&self, _record: &LogRecord) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn state() -> AppState {
        AppState::new(Config::default(), Arc::new(LogTee::new(NullSink)))
    }

    fn params(size: Option<&str>, delay: Option<&str>) -> Query<AllocParams> {
        Query(AllocParams {
            size: size.map(str::to_string),
            delay: delay.map(str::to_string),
        })
    }

    async fn rejection(size: Option<&str>, delay: Option<&str>) -> (StatusCode, String) {
        let response = alloc(State(state()), params(size, delay))
            .await
            .err()
            .unwrap()
            .into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_size() {
        assert_eq!(
            rejection(None, None).await,
            (
                StatusCode::BAD_REQUEST,
                "allocation size must be set\n".to_string()
            )
        );
        assert_eq!(rejection(Some(""), None).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_size() {
        assert_eq!(
            rejection(Some("5xyz"), None).await,
            (StatusCode::BAD_REQUEST, "5xyz: invalid size\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_delay() {
        assert_eq!(
            rejection(Some("1kB"), Some("soon")).await,
            (StatusCode::BAD_REQUEST, "soon: invalid delay\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_success_spawns_churn_task() {
        let state = state();
        let response = alloc(State(state.clone()), params(Some("4kB"), Some("10ms")))
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "memory allocated\n".as_bytes());
        assert_eq!(state.churn_tasks(), 1);
    }

    #[tokio::test]
    async fn test_churn_never_writes_to_the_replay_buffer() {
        use tracing_subscriber::layer::SubscriberExt;

        use crate::logging::TeeLayer;

        let tee = Arc::new(LogTee::new(NullSink));
        let subscriber = tracing_subscriber::registry().with(TeeLayer::new(tee.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let busy = tokio::spawn(churn(vec![0u8; 1000], Duration::ZERO));
        let idle = tokio::spawn(churn(Vec::new(), Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!busy.is_finished());
        assert!(!idle.is_finished());
        assert_eq!(tee.contents(), "");

        busy.abort();
        idle.abort();
    }

    #[test]
    fn test_allocate_random_length() {
        let buffer = allocate_random(4096).unwrap();
        assert_eq!(buffer.len(), 4096);
        // 4 KiB of random data is never all zeros
        assert!(buffer.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_allocate_impossible_size_fails() {
        let err = allocate_random(usize::MAX).unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

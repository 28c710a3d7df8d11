//! Shared application state for Axum handlers.
//!
//! - **Configuration**: validated runtime configuration
//! - **Logs**: the replay side of the dual-sink logger, served by `/_/logs`
//! - **Throttle**: the server-wide bandwidth budget, shared with the listener
//!   so `/_/stats` can report its counters
//!
//! # Background Jobs
//!
//! Memory churn tasks and the delayed exit are fire-and-forget: they are
//! never joined or cancelled. Churn tasks are spawned on a `TaskTracker`
//! only so that `/_/stats` can report how many are alive.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::listener::Throttle;
use crate::logging::LogTee;

/// Action run when `/_/crash` fires. Receives the exit code.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; all internal data is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Replay buffer of every log record
    pub logs: Arc<LogTee>,
    /// Bandwidth budget shared with the listener
    pub throttle: Arc<Throttle>,
    /// Monotonic process start, for uptime
    pub started_at: Instant,
    /// Wall-clock process start
    pub started_wall: DateTime<Local>,
    churn_tasks: TaskTracker,
    exit_hook: ExitHook,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("throttle", &self.throttle)
            .field("started_wall", &self.started_wall)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state from configuration and the replay handle returned by
    /// [`init_logging`](crate::logging::init_logging).
    ///
    /// The throttle is built from `config.bandwidth`; hand
    /// [`AppState::throttle`] to the listener so both share one budget.
    pub fn new(config: Config, logs: Arc<LogTee>) -> Self {
        let throttle = Arc::new(Throttle::new(config.bandwidth));

        Self {
            config: Arc::new(config),
            logs,
            throttle,
            started_at: Instant::now(),
            started_wall: Local::now(),
            churn_tasks: TaskTracker::new(),
            exit_hook: Arc::new(|code| std::process::exit(code)),
        }
    }

    /// Replace the process exit performed by `/_/crash`.
    pub fn with_exit_hook(mut self, hook: impl Fn(i32) + Send + Sync + 'static) -> Self {
        self.exit_hook = Arc::new(hook);
        self
    }

    /// Run the exit hook.
    pub fn exit(&self, code: i32) {
        (self.exit_hook)(code);
    }

    /// Spawn a memory churn task.
    pub fn spawn_churn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.churn_tasks.spawn(task);
    }

    /// Number of churn tasks currently alive.
    pub fn churn_tasks(&self) -> usize {
        self.churn_tasks.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    use crate::listener::BandwidthLimit;
    use crate::logging::{LogRecord, LogSink};

    struct NullSink;

    impl LogSink for NullSink {
        fn write_record(&self, _record: &LogRecord) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn state() -> AppState {
        AppState::new(Config::default(), Arc::new(LogTee::new(NullSink)))
    }

    #[test]
    fn test_throttle_follows_config() {
        let config = Config {
            bandwidth: BandwidthLimit::Unlimited,
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(LogTee::new(NullSink)));
        assert_eq!(state.throttle.limit(), BandwidthLimit::Unlimited);
    }

    #[test]
    fn test_exit_hook_replaced() {
        let seen = Arc::new(AtomicI32::new(-1));
        let seen_hook = seen.clone();
        let state = state().with_exit_hook(move |code| seen_hook.store(code, Ordering::SeqCst));

        state.exit(77);
        assert_eq!(seen.load(Ordering::SeqCst), 77);
    }

    #[tokio::test]
    async fn test_churn_tasks_are_counted() {
        let state = state();
        assert_eq!(state.churn_tasks(), 0);

        state.spawn_churn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert_eq!(state.churn_tasks(), 1);
    }
}

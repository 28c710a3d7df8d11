use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::signal;
use tracing::{error, warn};

/// Value returned by [`quick_id`] when the OS random source is unavailable.
///
/// Obviously not random; callers that need real entropy (generated
/// credentials) compare against it and refuse to continue.
pub const QUICK_ID_NOT_RANDOM: &str = "000000";

/// Generate a short URL-safe random identifier from `length` random bytes.
///
/// Falls back to [`QUICK_ID_NOT_RANDOM`] instead of failing, so request
/// handling never depends on the random source.
pub fn quick_id(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => URL_SAFE.encode(&bytes),
        Err(e) => {
            warn!(error = %e, "OS random source failed, using fixed id");
            QUICK_ID_NOT_RANDOM.to_string()
        }
    }
}

/// Resolve when the process is asked to stop (Ctrl+C, or SIGTERM on Unix).
///
/// A signal whose handler cannot be installed is logged and ignored; the
/// other one still triggers shutdown.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    };
    warn!(signal = signal_name, "Shutting down, draining in-flight requests");
}

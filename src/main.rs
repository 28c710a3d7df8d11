use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use webprobe::{
    AppState, ClientAddr, Config, LogTee, ThrottledListener, build_router, init_logging, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Logging depends on the configured level, so configuration errors go
    // straight to stderr
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("webprobe: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    let logs = init_logging(config.log_level);

    match run(config, logs).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(
    config: Config,
    logs: Arc<LogTee>,
) -> Result<(), exitcode::ExitCode> {
    match &config.credentials {
        Some(credentials) if credentials.password_generated => info!(
            username = %credentials.username,
            password = %credentials.password,
            "Generated Basic Auth credentials"
        ),
        Some(credentials) => info!(username = %credentials.username, "Basic Auth credentials set"),
        None => warn!("Authentication disabled, protected endpoints are open"),
    }

    if let Some(addr) = config.metrics_addr() {
        webprobe::metrics::try_init_metrics(addr);
    }

    let state = AppState::new(config, logs);
    let config = state.config.clone();

    let listener = ThrottledListener::bind(config.listen, state.throttle.clone())
        .await
        .map_err(|e| {
            error!(address = %config.listen, "Failed to bind: {e}");
            exitcode::UNAVAILABLE
        })?;

    info!(
        version = %config.version,
        address = %config.listen,
        static_dir = %config.static_dir.display(),
        bandwidth_limit = %config.bandwidth,
        "Starting server"
    );

    let app = build_router(state).into_make_service_with_connect_info::<ClientAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            exitcode::SOFTWARE
        })?;

    info!("Server shutdown complete");
    Ok(())
}

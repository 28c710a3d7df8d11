//! Application configuration from command-line flags and environment variables.
//!
//! # Configuration Hierarchy
//!
//! Every flag has an environment-variable fallback; an explicit flag wins.
//! A `.env` file in the working directory is loaded before parsing.
//!
//! | Flag             | Environment             | Default    |
//! |------------------|-------------------------|------------|
//! | `--listen`       | `WEBPROBE_LISTEN`       | `:8080`    |
//! | `--static`       | `WEBPROBE_STATIC_DIR`   | `./static` |
//! | `--bw-limit`     | `WEBPROBE_BW_LIMIT`     | `2GB`      |
//! | `--username`     | `WEBPROBE_USERNAME`     | `random`   |
//! | `--password`     | `WEBPROBE_PASSWORD`     | `random`   |
//! | `--log-level`    | `WEBPROBE_LOG_LEVEL`    | `debug`    |
//! | `--metrics-port` | `WEBPROBE_METRICS_PORT` | `0`        |
//!
//! # Security Configuration
//!
//! - `random` as username or password generates a value at startup
//! - An empty username disables authentication on all protected endpoints

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use crate::error::{AppError, AppResult};
use crate::listener::BandwidthLimit;
use crate::utils::{QUICK_ID_NOT_RANDOM, quick_id};

/// Sentinel value that asks for a generated username or password.
pub const RANDOM_SENTINEL: &str = "random";

/// Random bytes in a generated username.
const GENERATED_USERNAME_BYTES: usize = 12;

/// Random bytes in a generated password.
const GENERATED_PASSWORD_BYTES: usize = 24;

/// Maximum upload request body size (10 MiB).
pub const DEFAULT_UPLOAD_LIMIT: usize = 10 << 20;

/// Delay between answering `/_/crash` and exiting.
pub const DEFAULT_CRASH_GRACE: Duration = Duration::from_secs(2);

/// Raw command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "webprobe",
    version,
    about = "Diagnostic HTTP server with fault injection and a global bandwidth cap",
    long_about = None
)]
pub struct Args {
    /// Address (`host:port`) to listen on; `:port` listens on all interfaces
    #[arg(long, default_value = ":8080", env = "WEBPROBE_LISTEN")]
    pub listen: String,

    /// Directory from which static files are served
    #[arg(long = "static", default_value = "./static", env = "WEBPROBE_STATIC_DIR")]
    pub static_dir: PathBuf,

    /// Read and write bandwidth limit of the whole server (each, not combined),
    /// e.g. `2m`, `2MB`, `1.5GiB`; `0` or `off` disables limiting
    #[arg(long, default_value = "2GB", env = "WEBPROBE_BW_LIMIT")]
    pub bw_limit: String,

    /// Basic Auth username; `random` generates one, empty disables auth
    #[arg(long, default_value = RANDOM_SENTINEL, env = "WEBPROBE_USERNAME")]
    pub username: String,

    /// Basic Auth password; `random` generates one
    #[arg(
        long,
        default_value = RANDOM_SENTINEL,
        env = "WEBPROBE_PASSWORD",
        hide_env_values = true
    )]
    pub password: String,

    /// Minimum level of the console log stream (trace, debug, info, warn, error, off)
    #[arg(long, default_value = "debug", env = "WEBPROBE_LOG_LEVEL")]
    pub log_level: LevelFilter,

    /// Port for the Prometheus exporter; 0 disables it
    #[arg(long, default_value_t = 0, env = "WEBPROBE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// HTTP Basic Auth credentials. Immutable after startup.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Whether the password was generated at startup (and may be logged).
    pub password_generated: bool,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            password_generated: false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Listen address
    pub listen: SocketAddr,

    /// Static file root; uploads land in `<static_dir>/_/uploads`
    pub static_dir: PathBuf,

    /// Server-wide read and write bandwidth ceiling
    pub bandwidth: BandwidthLimit,

    /// Reported by `/_/version`
    pub version: String,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Basic Auth credentials (None = protected endpoints are open)
    pub credentials: Option<Credentials>,

    // =========================================================================
    // Diagnostics Configuration
    // =========================================================================
    /// Delay between answering `/_/crash` and exiting (default: 2s)
    pub crash_grace: Duration,

    /// Maximum upload request body size (default: 10 MiB)
    pub upload_limit: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Console log threshold; the replay buffer always keeps every level
    pub log_level: LevelFilter,

    /// Prometheus exporter port (0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load `.env`, parse the process arguments and resolve them.
    ///
    /// Exits with a usage message when the flags themselves are malformed.
    pub fn load() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_args(Args::parse())
    }

    /// Resolve raw arguments into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid listen address, bandwidth
    /// limit or static directory, or when credentials cannot be generated.
    pub fn from_args(args: Args) -> AppResult<Self> {
        if args.static_dir.as_os_str().is_empty() {
            return Err(AppError::Config(
                "static directory cannot be empty".to_string(),
            ));
        }

        let config = Self {
            listen: parse_listen_addr(&args.listen)?,
            static_dir: args.static_dir,
            bandwidth: args
                .bw_limit
                .parse()
                .map_err(|e| AppError::Config(format!("{e}")))?,
            version: env!("CARGO_PKG_VERSION").to_string(),
            credentials: resolve_credentials(&args.username, &args.password)?,
            crash_grace: DEFAULT_CRASH_GRACE,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            log_level: args.log_level,
            metrics_port: args.metrics_port,
        };

        Ok(config)
    }

    /// Directory receiving uploaded files.
    pub fn upload_dir(&self) -> PathBuf {
        self.static_dir.join("_").join("uploads")
    }

    /// Check if Basic Auth is enabled.
    pub fn auth_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        (self.metrics_port > 0).then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }
}

/// Parse `host:port`, accepting `:port` for all interfaces.
fn parse_listen_addr(listen: &str) -> AppResult<SocketAddr> {
    let listen = listen.trim();
    if listen.is_empty() {
        return Err(AppError::Config(
            "listen address cannot be empty".to_string(),
        ));
    }

    let candidate = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    };

    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| AppError::Config(format!("invalid listen address '{listen}'")))
}

/// Apply the `random` sentinel and the empty-username rule.
fn resolve_credentials(username: &str, password: &str) -> AppResult<Option<Credentials>> {
    if username.is_empty() {
        return Ok(None);
    }

    let username = if username == RANDOM_SENTINEL {
        generate_secret(GENERATED_USERNAME_BYTES, "username")?
    } else {
        username.to_string()
    };

    let password_generated = password == RANDOM_SENTINEL;
    let password = if password_generated {
        generate_secret(GENERATED_PASSWORD_BYTES, "password")?
    } else {
        password.to_string()
    };

    Ok(Some(Credentials {
        username,
        password,
        password_generated,
    }))
}

fn generate_secret(bytes: usize, what: &str) -> AppResult<String> {
    let secret = quick_id(bytes);
    if secret == QUICK_ID_NOT_RANDOM {
        return Err(AppError::Config(format!(
            "failed to generate a random {what}"
        )));
    }
    Ok(secret)
}

/// Default configuration for testing.
///
/// Binds an ephemeral loopback port and leaves authentication disabled.
impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            static_dir: PathBuf::from("./static"),
            bandwidth: BandwidthLimit::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            credentials: None,
            crash_grace: DEFAULT_CRASH_GRACE,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            log_level: LevelFilter::DEBUG,
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["webprobe"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.upload_limit, 10 * 1024 * 1024);
        assert_eq!(config.crash_grace, Duration::from_secs(2));
        assert_eq!(config.bandwidth, BandwidthLimit::default());
        assert!(!config.auth_enabled());
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_listen_port_only_binds_all_interfaces() {
        let config = Config::from_args(args(&["--listen", ":9000"])).unwrap();
        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 9000)));
    }

    #[test]
    fn test_listen_host_and_port() {
        let config = Config::from_args(args(&["--listen", "127.0.0.1:8081"])).unwrap();
        assert_eq!(config.listen, SocketAddr::from(([127, 0, 0, 1], 8081)));
    }

    #[test]
    fn test_invalid_listen_address() {
        let err = Config::from_args(args(&["--listen", "not an address"])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn test_invalid_bandwidth_is_config_error() {
        let err = Config::from_args(args(&["--bw-limit", "lots"])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("invalid bandwidth limit 'lots'"));
    }

    #[test]
    fn test_bandwidth_flag() {
        let config = Config::from_args(args(&["--bw-limit", "2MB"])).unwrap();
        assert_eq!(
            config.bandwidth,
            BandwidthLimit::PerSecond(NonZeroU64::new(2_000_000).unwrap())
        );
    }

    #[test]
    fn test_zero_bandwidth_disables_limit() {
        let config = Config::from_args(args(&["--bw-limit", "0"])).unwrap();
        assert_eq!(config.bandwidth, BandwidthLimit::Unlimited);
    }

    #[test]
    fn test_random_sentinel_generates_credentials() {
        let config = Config::from_args(args(&[])).unwrap();
        let credentials = config.credentials.unwrap();

        assert_eq!(credentials.username.len(), 16);
        assert_eq!(credentials.password.len(), 32);
        assert!(credentials.password_generated);
    }

    #[test]
    fn test_explicit_credentials_are_kept() {
        let config =
            Config::from_args(args(&["--username", "admin", "--password", "hunter2"])).unwrap();
        let credentials = config.credentials.unwrap();

        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password, "hunter2");
        assert!(!credentials.password_generated);
    }

    #[test]
    fn test_empty_username_disables_auth() {
        let config = Config::from_args(args(&["--username", ""])).unwrap();
        assert!(!config.auth_enabled());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_log_level_flag() {
        let config = Config::from_args(args(&["--log-level", "warn"])).unwrap();
        assert_eq!(config.log_level, LevelFilter::WARN);
    }

    #[test]
    fn test_upload_dir() {
        let config = Config {
            static_dir: PathBuf::from("/srv/www"),
            ..Config::default()
        };
        assert_eq!(config.upload_dir(), PathBuf::from("/srv/www/_/uploads"));
    }

    #[test]
    fn test_metrics_addr() {
        let config = Config {
            metrics_port: 9090,
            ..Config::default()
        };
        assert_eq!(
            config.metrics_addr(),
            Some(SocketAddr::from(([0, 0, 0, 0], 9090)))
        );
    }
}

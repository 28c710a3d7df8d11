mod alloc;
mod crash;
mod echo;
mod info;
pub mod upload;

use axum::http::Method;

use crate::error::AppError;

pub use alloc::alloc;
pub use crash::crash;
pub use echo::echo;
pub use info::{env, logs, stats, version};
pub use upload::{sanitize_filename, upload};

/// Fallback for methods a fixed-method endpoint does not support.
pub async fn method_not_implemented(method: Method) -> AppError {
    AppError::NotImplemented(format!("method {method} not implemented for this path"))
}

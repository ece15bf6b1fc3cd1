//! services/coach/src/error.rs
//!
//! Errors that stop the coach server from starting or keep it from serving.
//! Request-level failures never reach this type; handlers map them to status codes.

use crate::config::ConfigError;
use titanfit_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The data directory could not be prepared for the profile store.
    #[error("Cannot open the profile store: {0}")]
    Storage(#[from] PortError),

    /// Binding the listener or serving connections failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ALLOWED_ORIGIN is not a valid header value: {0}")]
    InvalidOrigin(String),
}

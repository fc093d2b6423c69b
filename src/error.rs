// Error handling module
// Construction-time failures (configuration, files, TLS material, client setup).
// Per-attempt failures never surface here; they become error records.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a configuration into a ready-to-run engine
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration string could not be parsed
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// A referenced file could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed JSON configuration file
    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    /// Certificate or key material rejected
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP client or request construction failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for construction operations
pub type Result<T> = std::result::Result<T, Error>;

//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use crate::config::ConfigError;
use edubase_core::orchestrator::DownloadError;
use edubase_core::ports::PortError;
use edubase_core::validation::ValidationError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A download that could not be completed.
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    /// A command line value that failed the request checks.
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Bad interactive input or flag combination.
    #[error("{0}")]
    Usage(String),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

//! Server error types.

use thiserror::Error;

/// Errors from starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

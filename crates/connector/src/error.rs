//! Error types for the repository connector.

/// Failure reported by a [`Transport`](crate::Transport) through
/// [`ResponseHandler::on_error`](crate::ResponseHandler::on_error).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors returned by a batch call or while building a connector.
///
/// Per-request failures never surface here; they are recorded on the
/// originating [`Download`](crate::Download) or [`Upload`](crate::Upload).
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector is closed")]
    Closed,

    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

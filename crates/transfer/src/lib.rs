//! Transfer primitives for the artifact connector: lifecycle events, the
//! listener registry, per-transfer byte accounting, the progress-reporting
//! upload body and pluggable checksum algorithms.
//!
//! Nothing in this crate touches the network; the connector crate drives
//! these pieces from transport callbacks.

mod body;
pub mod checksum;
mod events;
mod progress;
mod types;
mod validation;

pub use body::{BodyState, BodyStrategy, ProgressBodySource};
pub use checksum::{ChecksumAlgorithm, ChecksumFailure, DigestAlgorithm};
pub use events::{
    EventBus, ListenerError, ListenerId, TransferCancelled, TransferListener, listener_fn,
};
pub use progress::{SpeedCalculator, TransferTracker};
pub use types::{
    ChecksumPolicy, EventKind, FileRegion, RequestKind, TransferEvent, TransferResource,
};
pub use validation::validate_resource_path;

/// Default upload pull size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a failed transfer, attached to the originating request.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("checksum verification failed: {0}")]
    ChecksumFailed(#[from] ChecksumFailure),

    #[error("unexpected status {code}{}", fmt_detail(.detail))]
    Status { code: u16, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unexpected end of file with {remaining} bytes of the region left")]
    UnexpectedEof { remaining: u64 },
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl TransferError {
    /// Wraps any transport-level failure.
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        TransferError::Transport(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound(_))
    }

    pub fn is_checksum_failure(&self) -> bool {
        matches!(self, TransferError::ChecksumFailed(_))
    }
}

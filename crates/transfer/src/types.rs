use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Download from the repository.
    Get,
    /// Upload to the repository.
    Put,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Get => f.write_str("GET"),
            RequestKind::Put => f.write_str("PUT"),
        }
    }
}

/// Lifecycle notification kind carried by a [`TransferEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initiated,
    Started,
    Progressed,
    Corrupted,
    Succeeded,
    Failed,
}

impl EventKind {
    /// Returns `true` for events after which no further events are fired
    /// for the transfer (except CORRUPTED following SUCCEEDED).
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Succeeded | EventKind::Failed)
    }
}

/// How a download reacts to a failed checksum verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Integrity is mandatory: the download fails and the file is emptied.
    #[default]
    Fail,
    /// Report a CORRUPTED event but accept the download.
    Warn,
    /// Skip verification.
    Ignore,
}

impl std::str::FromStr for ChecksumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(ChecksumPolicy::Fail),
            "warn" => Ok(ChecksumPolicy::Warn),
            "ignore" => Ok(ChecksumPolicy::Ignore),
            other => Err(format!("unknown checksum policy: {other}")),
        }
    }
}

/// A byte range of a local file: `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRegion {
    pub offset: u64,
    pub length: u64,
}

impl FileRegion {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// The region covering a whole file of `len` bytes.
    pub fn whole(len: u64) -> Self {
        Self {
            offset: 0,
            length: len,
        }
    }
}

/// Identifies one transfer: where it lives remotely and locally.
///
/// Shared immutably with every event of the transfer. The content length is
/// a set-once cell because downloads only learn it from response headers.
#[derive(Debug)]
pub struct TransferResource {
    repository_url: String,
    resource_name: String,
    file: PathBuf,
    content_length: OnceLock<u64>,
    last_modified: Option<SystemTime>,
}

impl TransferResource {
    /// Creates a resource; `resource_name` is relative to `repository_url`.
    pub fn new(
        repository_url: impl Into<String>,
        resource_name: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            resource_name: resource_name.into(),
            file: file.into(),
            content_length: OnceLock::new(),
            last_modified: None,
        }
    }

    /// Sets a length that is already known at creation (uploads).
    pub fn with_content_length(self, len: u64) -> Self {
        let _ = self.content_length.set(len);
        self
    }

    pub fn with_last_modified(mut self, at: SystemTime) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Full URL of the resource: repository URL joined with the resource name.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.repository_url.trim_end_matches('/'),
            self.resource_name.trim_start_matches('/')
        )
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Declared length, `None` while unknown.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length.get().copied()
    }

    /// Records the declared length. Returns `false` if it was already set.
    pub fn set_content_length(&self, len: u64) -> bool {
        self.content_length.set(len).is_ok()
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }
}

impl fmt::Display for TransferResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.repository_url.trim_end_matches('/'),
            self.resource_name
        )
    }
}

/// One lifecycle notification.
///
/// Built through the kind-specific constructors, which enforce that `data`
/// is only present on PROGRESSED and `error` only on CORRUPTED/FAILED.
#[derive(Debug, Clone, Copy)]
pub struct TransferEvent<'a> {
    request: RequestKind,
    kind: EventKind,
    resource: &'a TransferResource,
    transferred: u64,
    data: Option<&'a [u8]>,
    error: Option<&'a TransferError>,
}

impl<'a> TransferEvent<'a> {
    fn plain(
        request: RequestKind,
        kind: EventKind,
        resource: &'a TransferResource,
        transferred: u64,
    ) -> Self {
        Self {
            request,
            kind,
            resource,
            transferred,
            data: None,
            error: None,
        }
    }

    pub fn initiated(request: RequestKind, resource: &'a TransferResource) -> Self {
        Self::plain(request, EventKind::Initiated, resource, 0)
    }

    pub fn started(request: RequestKind, resource: &'a TransferResource) -> Self {
        Self::plain(request, EventKind::Started, resource, 0)
    }

    pub fn progressed(
        request: RequestKind,
        resource: &'a TransferResource,
        transferred: u64,
        data: &'a [u8],
    ) -> Self {
        Self {
            data: Some(data),
            ..Self::plain(request, EventKind::Progressed, resource, transferred)
        }
    }

    pub fn succeeded(
        request: RequestKind,
        resource: &'a TransferResource,
        transferred: u64,
    ) -> Self {
        Self::plain(request, EventKind::Succeeded, resource, transferred)
    }

    pub fn corrupted(
        request: RequestKind,
        resource: &'a TransferResource,
        transferred: u64,
        error: &'a TransferError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::plain(request, EventKind::Corrupted, resource, transferred)
        }
    }

    pub fn failed(
        request: RequestKind,
        resource: &'a TransferResource,
        transferred: u64,
        error: &'a TransferError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::plain(request, EventKind::Failed, resource, transferred)
        }
    }

    pub fn request(&self) -> RequestKind {
        self.request
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn resource(&self) -> &'a TransferResource {
        self.resource
    }

    /// Cumulative bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Bytes moved by this notification (PROGRESSED only).
    pub fn data(&self) -> Option<&'a [u8]> {
        self.data
    }

    /// Length of [`data`](Self::data), 0 when absent.
    pub fn data_len(&self) -> usize {
        self.data.map_or(0, <[u8]>::len)
    }

    pub fn error(&self) -> Option<&'a TransferError> {
        self.error
    }
}

impl fmt::Display for TransferEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.request, self.kind, self.resource)
    }
}

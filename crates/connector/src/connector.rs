//! Batch facade over the transport, the controllers and the verifier.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use artifact_transfer::{
    BodyStrategy, ChecksumPolicy, EventBus, FileRegion, ListenerId, ProgressBodySource,
    RequestKind, TransferError, TransferListener, TransferResource, TransferTracker,
    validate_resource_path,
};
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info};

use crate::config::ConnectorConfig;
use crate::controller::TransferController;
use crate::error::ConnectorError;
use crate::http::HttpTransport;
use crate::transport::{HttpRequest, RequestBody, Transport};
use crate::verifier::ChecksumVerifier;

/// A resource to fetch into a local file.
#[derive(Debug)]
pub struct Download {
    /// Repository-relative path, e.g. `gid/aid/1.0/aid-1.0.jar`.
    pub path: String,
    pub file: PathBuf,
    pub checksum_policy: ChecksumPolicy,
    /// Outcome, set once the batch ran. `None` means success.
    pub error: Option<TransferError>,
}

impl Download {
    pub fn new(path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: file.into(),
            checksum_policy: ChecksumPolicy::default(),
            error: None,
        }
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }
}

/// A local file, or a region of one, to store in the repository.
#[derive(Debug)]
pub struct Upload {
    pub path: String,
    pub file: PathBuf,
    /// Uploads the whole file when `None`.
    pub region: Option<FileRegion>,
    pub error: Option<TransferError>,
}

impl Upload {
    pub fn new(path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: file.into(),
            region: None,
            error: None,
        }
    }

    pub fn with_region(mut self, region: FileRegion) -> Self {
        self.region = Some(region);
        self
    }
}

/// Downloads and uploads batches of resources against one repository.
///
/// Requests of a batch run concurrently up to
/// [`ConnectorConfig::max_concurrent_transfers`]. Each request's outcome is
/// stored on the request itself; the batch call only fails once the
/// connector is closed.
pub struct RepositoryConnector {
    repository_url: String,
    transport: Arc<dyn Transport>,
    listeners: Arc<EventBus>,
    verifier: ChecksumVerifier,
    config: ConnectorConfig,
    closed: AtomicBool,
}

impl RepositoryConnector {
    pub fn new(
        repository_url: impl Into<String>,
        config: ConnectorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConnectorError> {
        let verifier = ChecksumVerifier::new(config.resolve_algorithms()?);
        Ok(Self {
            repository_url: repository_url.into(),
            transport,
            listeners: Arc::new(EventBus::new()),
            verifier,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Connector over the reqwest-based [`HttpTransport`].
    pub fn http(
        repository_url: impl Into<String>,
        config: ConnectorConfig,
    ) -> Result<Self, ConnectorError> {
        let transport = HttpTransport::new(&config)?;
        Self::new(repository_url, config, Arc::new(transport))
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The session-wide listener registry.
    pub fn listeners(&self) -> &Arc<EventBus> {
        &self.listeners
    }

    pub fn subscribe(&self, listener: Arc<dyn TransferListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Rejects further batches. Requests already in flight run to the end.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(repository = %self.repository_url, "connector closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ConnectorError> {
        if self.is_closed() {
            return Err(ConnectorError::Closed);
        }
        Ok(())
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrent_transfers.max(1)
    }

    /// Downloads every request, recording each outcome in
    /// [`Download::error`].
    pub async fn get(&self, downloads: &mut [Download]) -> Result<(), ConnectorError> {
        self.ensure_open()?;

        stream::iter(downloads.iter_mut())
            .map(|download| async move {
                download.error = self.download(download).await.err();
            })
            .buffer_unordered(self.concurrency())
            .collect::<()>()
            .await;

        let failed = downloads.iter().filter(|d| d.error.is_some()).count();
        info!(
            repository = %self.repository_url,
            total = downloads.len(),
            failed,
            "download batch finished"
        );
        Ok(())
    }

    /// Uploads every request, recording each outcome in [`Upload::error`].
    pub async fn put(&self, uploads: &mut [Upload]) -> Result<(), ConnectorError> {
        self.ensure_open()?;

        stream::iter(uploads.iter_mut())
            .map(|upload| async move {
                upload.error = self.upload(upload).await.err();
            })
            .buffer_unordered(self.concurrency())
            .collect::<()>()
            .await;

        let failed = uploads.iter().filter(|u| u.error.is_some()).count();
        info!(
            repository = %self.repository_url,
            total = uploads.len(),
            failed,
            "upload batch finished"
        );
        Ok(())
    }

    fn tracker(&self, path: &str, file: &Path, request: RequestKind) -> Arc<TransferTracker> {
        let resource = Arc::new(TransferResource::new(&self.repository_url, path, file));
        Arc::new(TransferTracker::new(
            Arc::clone(&self.listeners),
            resource,
            request,
        ))
    }

    async fn download(&self, download: &Download) -> Result<(), TransferError> {
        validate_resource_path(&download.path)?;
        let tracker = self.tracker(&download.path, &download.file, RequestKind::Get);
        if tracker.initiated().is_err() {
            return Err(fail_early(&tracker, TransferError::Cancelled));
        }

        let url = tracker.resource().url();
        debug!(%url, file = %download.file.display(), "downloading");
        let mut controller = TransferController::new(Arc::clone(&tracker));
        self.transport
            .execute(HttpRequest::get(url), &mut controller)
            .await;
        controller.finish().await?;

        self.verifier
            .verify(self.transport.as_ref(), &tracker, download.checksum_policy)
            .await
    }

    async fn upload(&self, upload: &Upload) -> Result<(), TransferError> {
        validate_resource_path(&upload.path)?;
        let tracker = self.tracker(&upload.path, &upload.file, RequestKind::Put);
        if tracker.initiated().is_err() {
            return Err(fail_early(&tracker, TransferError::Cancelled));
        }

        let opened = ProgressBodySource::open(&upload.file, upload.region, Arc::clone(&tracker));
        let source = match opened {
            Ok(source) => source,
            Err(e) => return Err(fail_early(&tracker, e)),
        };
        tracker.resource().set_content_length(source.content_length());

        let url = tracker.resource().url();
        let strategy = BodyStrategy::select(
            self.transport.is_secure(&url),
            self.config.disable_zero_copy,
            self.config.chunk_size,
        );
        debug!(%url, bytes = source.content_length(), ?strategy, "uploading");

        let mut controller = TransferController::new(tracker);
        self.transport
            .execute(
                HttpRequest::put(url, RequestBody { source, strategy }),
                &mut controller,
            )
            .await;
        controller.finish().await.map(|_| ())
    }
}

/// Fires FAILED for a request that never reached the transport.
fn fail_early(tracker: &TransferTracker, error: TransferError) -> TransferError {
    tracker.failed(&error);
    error
}

impl std::fmt::Debug for RepositoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryConnector")
            .field("repository_url", &self.repository_url)
            .field("listeners", &self.listeners.len())
            .field("verifier", &self.verifier)
            .field("closed", &self.is_closed())
            .finish()
    }
}

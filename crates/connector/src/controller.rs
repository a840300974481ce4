//! Per-request state machine driven by transport callbacks.

use std::sync::Arc;

use artifact_transfer::{RequestKind, TransferError, TransferTracker};
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use tracing::{debug, warn};

use crate::accumulator::ResponseAccumulator;
use crate::error::TransportError;
use crate::transport::{Control, ResponseHandler};

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Init,
    StatusReceived,
    HeadersReceived,
    BodyStreaming,
    Completed,
    Failed,
    Aborted,
}

impl ControllerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerState::Completed | ControllerState::Failed | ControllerState::Aborted
        )
    }
}

/// Turns the callbacks of one download or upload into lifecycle events and
/// a final outcome.
///
/// Downloads stream 2xx bodies into the resource's file; anything else is
/// kept in a bounded memory buffer. Callbacks only buffer file writes; the
/// flush and sync happen in [`finish`](Self::finish), off the runtime, which
/// then fires SUCCEEDED or a single FAILED.
#[derive(Debug)]
pub struct TransferController {
    tracker: Arc<TransferTracker>,
    response: ResponseAccumulator,
    state: ControllerState,
    error: Option<TransferError>,
}

impl TransferController {
    pub fn new(tracker: Arc<TransferTracker>) -> Self {
        Self {
            tracker,
            response: ResponseAccumulator::new(),
            state: ControllerState::Init,
            error: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn tracker(&self) -> &Arc<TransferTracker> {
        &self.tracker
    }

    pub fn response(&self) -> &ResponseAccumulator {
        &self.response
    }

    fn is_download(&self) -> bool {
        self.tracker.request() == RequestKind::Get
    }

    fn end(&mut self, state: ControllerState, error: TransferError) -> Control {
        debug!(
            resource = %self.tracker.resource(),
            ?state,
            error = %error,
            "transfer ended"
        );
        self.state = state;
        self.error = Some(error);
        Control::Abort
    }

    fn cancelled(&mut self) -> Control {
        self.end(ControllerState::Aborted, TransferError::Cancelled)
    }

    /// Resolves the outcome once the transport returned.
    ///
    /// Returns the byte count on success. On failure fires FAILED with the
    /// error before returning it.
    pub async fn finish(mut self) -> Result<u64, TransferError> {
        if self.state == ControllerState::Completed {
            match self.response.finish().await {
                Ok(()) => {
                    self.tracker.succeeded();
                    return Ok(self.tracker.transferred());
                }
                Err(e) => {
                    self.end(ControllerState::Failed, e.into());
                }
            }
        }

        let error = match self.error.take() {
            Some(e) => e,
            None if self.tracker.is_cancelled() => TransferError::Cancelled,
            None => TransferError::transport(format!(
                "exchange ended in state {:?} without completing",
                self.state
            )),
        };
        // Close the sink before listeners see the failure.
        drop(self.response);
        self.tracker.failed(&error);
        Err(error)
    }
}

impl ResponseHandler for TransferController {
    fn on_headers_written(&mut self) -> Control {
        if self.is_download() {
            return Control::Continue;
        }
        self.tracker.reset();
        if self.tracker.started().is_err() {
            return self.cancelled();
        }
        Control::Continue
    }

    fn on_status_received(&mut self, status: u16) -> Control {
        self.response.set_status(status);
        self.state = ControllerState::StatusReceived;
        if status == 404 {
            let url = self.tracker.resource().url();
            return self.end(ControllerState::Aborted, TransferError::NotFound(url));
        }
        Control::Continue
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Control {
        self.response.set_headers(headers);
        self.state = ControllerState::HeadersReceived;
        if !self.is_download() || !self.response.is_success() {
            return Control::Continue;
        }

        if let Some(len) = content_length(headers) {
            self.tracker.resource().set_content_length(len);
        }
        let path = self.tracker.resource().file().to_path_buf();
        if let Err(e) = self.response.bind_file(&path) {
            return self.end(ControllerState::Failed, e.into());
        }
        if self.tracker.started().is_err() {
            return self.cancelled();
        }
        Control::Continue
    }

    fn on_body_part(&mut self, chunk: &[u8]) -> Control {
        if self.state.is_terminal() {
            return Control::Abort;
        }
        self.state = ControllerState::BodyStreaming;

        if let Err(e) = self.response.append(chunk) {
            return self.end(ControllerState::Failed, e.into());
        }
        if self.response.is_file_bound() && self.tracker.progressed(chunk).is_err() {
            return self.cancelled();
        }
        Control::Continue
    }

    fn on_error(&mut self, error: TransportError) {
        if self.state.is_terminal() {
            debug!(resource = %self.tracker.resource(), %error, "transport error after end");
            return;
        }
        if self.tracker.is_cancelled() {
            self.cancelled();
        } else {
            self.end(ControllerState::Failed, TransferError::transport(error));
        }
    }

    fn on_completed(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        match self.response.status() {
            Some(_) if self.response.is_success() => {
                self.state = ControllerState::Completed;
                debug!(
                    request = %self.tracker.request(),
                    resource = %self.tracker.resource(),
                    bytes = self.tracker.transferred(),
                    "transfer completed"
                );
            }
            Some(code) => {
                let detail = self.response.detail();
                warn!(resource = %self.tracker.resource(), code, "unexpected status");
                self.end(ControllerState::Failed, TransferError::Status { code, detail });
            }
            None => {
                self.end(
                    ControllerState::Failed,
                    TransferError::transport("completed without a status"),
                );
            }
        }
    }
}

/// Parses `Content-Length`; absent or malformed values yield `None`.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

//! Transport abstraction: an HTTP exchange driven through callbacks.
//!
//! The connector never talks to the network itself. It hands an
//! [`HttpRequest`] and a [`ResponseHandler`] to a [`Transport`], which
//! reports the exchange back in order:
//!
//! 1. `on_headers_written` (requests with a body only)
//! 2. `on_status_received`
//! 3. `on_headers_received`
//! 4. `on_body_part`, zero or more times
//! 5. exactly one of `on_error` or `on_completed`
//!
//! Any callback returning [`Control::Abort`] ends the exchange; the
//! transport then drops the connection and invokes nothing else.

use std::future::Future;
use std::pin::Pin;

use artifact_transfer::{BodyStrategy, ProgressBodySource, RequestKind};
use reqwest::header::HeaderMap;

use crate::error::TransportError;

/// Whether the transport should keep going after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Abort,
}

/// Receives the callbacks of one exchange.
pub trait ResponseHandler: Send {
    /// The request line and headers were handed to the connection; the body
    /// is about to be pulled.
    fn on_headers_written(&mut self) -> Control {
        Control::Continue
    }

    fn on_status_received(&mut self, status: u16) -> Control;

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Control;

    fn on_body_part(&mut self, chunk: &[u8]) -> Control;

    /// Terminal. Called at most once, never after `on_completed`.
    fn on_error(&mut self, error: TransportError);

    /// Terminal. Called once the whole body was delivered.
    fn on_completed(&mut self);
}

/// Upload body plus the strategy the transport must consume it with.
#[derive(Debug)]
pub struct RequestBody {
    pub source: ProgressBodySource,
    pub strategy: BodyStrategy,
}

/// One exchange to execute.
#[derive(Debug)]
pub struct HttpRequest {
    pub kind: RequestKind,
    pub url: String,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn put(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            kind: RequestKind::Put,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Executes HTTP exchanges on behalf of the connector.
///
/// Implemented by [`HttpTransport`](crate::HttpTransport) over reqwest; tests
/// substitute scripted transports.
pub trait Transport: Send + Sync {
    /// Runs the exchange to its end, reporting through `handler`.
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
        handler: &'a mut dyn ResponseHandler,
    ) -> TransportFuture<'a>;

    /// Whether `url` goes over TLS. Decides the upload body strategy.
    fn is_secure(&self, url: &str) -> bool {
        url.get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }
}

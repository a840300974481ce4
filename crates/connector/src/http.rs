//! [`Transport`] over a shared `reqwest` client.

use std::io::{self, Write};
use std::time::Duration;

use artifact_transfer::{BodyState, BodyStrategy, ProgressBodySource, RequestKind, TransferError};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ConnectorConfig;
use crate::error::TransportError;
use crate::transport::{
    Control, HttpRequest, RequestBody, ResponseHandler, Transport, TransportFuture,
};

/// Chunks queued between the blocking zero-copy writer and the request
/// body stream.
const ZERO_COPY_QUEUE: usize = 4;

type BodyChunk = Result<Vec<u8>, TransferError>;

/// Sent by the request body on its first poll. The transport answers
/// through the inner sender with the handler's verdict on
/// [`ResponseHandler::on_headers_written`].
type HeadersWritten = oneshot::Sender<oneshot::Sender<Control>>;

/// HTTP(S) transport. One client, and therefore one connection pool, per
/// connector.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with the configured timeouts and user agent.
    pub fn new(config: &ConnectorConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn run(&self, request: HttpRequest, handler: &mut dyn ResponseHandler) {
        let HttpRequest { kind, url, body } = request;
        debug!(%kind, %url, "sending request");

        let mut builder = match kind {
            RequestKind::Get => self.client.get(&url),
            RequestKind::Put => self.client.put(&url),
        };
        let mut headers_written = None;
        if let Some(body) = body {
            let (gate, written) = oneshot::channel();
            headers_written = Some(written);
            builder = builder
                .header(CONTENT_LENGTH, body.source.content_length())
                .body(into_reqwest_body(body, gate));
        }

        // reqwest first polls the body once the connection is up and the
        // request head is queued; nothing is read from the source before that.
        let send = builder.send();
        tokio::pin!(send);
        let sent = loop {
            tokio::select! {
                sent = &mut send => break sent,
                reply = next_headers_written(&mut headers_written) => {
                    let control = handler.on_headers_written();
                    // The body is gone if the exchange already failed.
                    let _ = reply.send(control);
                    if control == Control::Abort {
                        debug!(%url, "exchange aborted after request head");
                        return;
                    }
                }
            }
        };

        let mut response = match sent {
            Ok(r) => r,
            Err(e) => {
                handler.on_error(e.into());
                return;
            }
        };

        // Returning early drops `response`, which closes the connection
        // instead of draining the body.
        if handler.on_status_received(response.status().as_u16()) == Control::Abort {
            debug!(%url, status = response.status().as_u16(), "exchange aborted on status");
            return;
        }
        if handler.on_headers_received(response.headers()) == Control::Abort {
            return;
        }
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if handler.on_body_part(&chunk) == Control::Abort {
                        debug!(%url, "exchange aborted during body");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    handler.on_error(e.into());
                    return;
                }
            }
        }
        handler.on_completed();
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
        handler: &'a mut dyn ResponseHandler,
    ) -> TransportFuture<'a> {
        Box::pin(self.run(request, handler))
    }
}

/// Resolves with the reply channel once the body reports its first poll.
/// Pending forever when there is no body, or when the body was dropped
/// unpolled.
async fn next_headers_written(
    written: &mut Option<oneshot::Receiver<oneshot::Sender<Control>>>,
) -> oneshot::Sender<Control> {
    if let Some(rx) = written.take() {
        if let Ok(reply) = rx.await {
            return reply;
        }
    }
    std::future::pending().await
}

/// Asks the transport whether to go on with the body.
async fn headers_flushed(gate: HeadersWritten) -> Control {
    let (reply, verdict) = oneshot::channel();
    if gate.send(reply).is_err() {
        return Control::Abort;
    }
    verdict.await.unwrap_or(Control::Abort)
}

/// Neither strategy touches the source until reqwest first polls the body.
fn into_reqwest_body(body: RequestBody, gate: HeadersWritten) -> reqwest::Body {
    let RequestBody { source, strategy } = body;
    let chunks = stream::once(async move {
        if headers_flushed(gate).await == Control::Abort {
            let aborted: BoxStream<'static, BodyChunk> =
                stream::iter([Err(TransferError::Cancelled)]).boxed();
            return aborted;
        }
        match strategy {
            BodyStrategy::Buffered { chunk_size } => buffered_stream(source, chunk_size).boxed(),
            BodyStrategy::ZeroCopy => zero_copy_stream(source).boxed(),
        }
    })
    .flatten();
    reqwest::Body::wrap_stream(chunks)
}

/// Pulls `chunk_size` bytes at a time, each read on a blocking thread.
fn buffered_stream(
    source: ProgressBodySource,
    chunk_size: usize,
) -> impl Stream<Item = BodyChunk> + Send + 'static {
    let chunk_size = chunk_size.max(1);
    stream::try_unfold(Some(source), move |state| async move {
        match state {
            Some(source) => pull_chunk(source, chunk_size).await,
            None => Ok(None),
        }
    })
}

type Pulled = Option<(Vec<u8>, Option<ProgressBodySource>)>;

async fn pull_chunk(
    mut source: ProgressBodySource,
    chunk_size: usize,
) -> Result<Pulled, TransferError> {
    let (source, pulled) = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; chunk_size];
        let pulled = source.read(&mut buf).map(|(n, state)| {
            buf.truncate(n);
            (buf, state)
        });
        (source, pulled)
    })
    .await
    .map_err(|e| TransferError::Io(io::Error::other(e)))?;

    let (chunk, state) = pulled?;
    if chunk.is_empty() {
        return Ok(None);
    }
    let next = match state {
        BodyState::Continue => Some(source),
        BodyState::Stop => None,
    };
    Ok(Some((chunk, next)))
}

/// Runs [`ProgressBodySource::transfer_to`] once on a blocking thread,
/// forwarding each write through a bounded channel.
///
/// reqwest has no sendfile path and hyper wants owned buffers, so every
/// write is copied once into the channel. What this mode keeps is the
/// write-sized PROGRESSED granularity of `transfer_to`; it saves no copies
/// over the buffered mode.
fn zero_copy_stream(
    mut source: ProgressBodySource,
) -> impl Stream<Item = BodyChunk> + Send + 'static {
    let (tx, rx) = mpsc::channel(ZERO_COPY_QUEUE);
    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelWriter { tx: tx.clone() };
        if let Err(e) = source.transfer_to(&mut sink) {
            // The receiver is gone when the exchange was dropped.
            let _ = tx.blocking_send(Err(e));
        }
    });
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

struct ChannelWriter {
    tx: mpsc::Sender<BodyChunk>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

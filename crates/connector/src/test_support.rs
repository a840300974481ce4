//! Test transports: a scripted in-process transport and a mock repository
//! served over real HTTP.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use artifact_transfer::{BodyState, BodyStrategy, RequestKind};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::transport::{Control, HttpRequest, ResponseHandler, Transport, TransportFuture};

/// One callback in a scripted exchange.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(u16),
    Headers(Vec<(&'static str, String)>),
    Chunk(Vec<u8>),
    Error(String),
    Complete,
}

/// Replays a fixed callback script per URL. Unknown GETs answer 404,
/// unknown PUTs answer 201.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    requested: Mutex<Vec<String>>,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    secure: bool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn secure() -> Self {
        Self {
            secure: true,
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, url: &str, steps: Vec<Step>) {
        self.scripts.lock().unwrap().insert(url.to_string(), steps);
    }

    /// 200 with `Content-Length` and the body in one chunk.
    pub(crate) fn serve(&self, url: &str, body: &[u8]) {
        self.serve_chunked(url, vec![body.to_vec()]);
    }

    pub(crate) fn serve_chunked(&self, url: &str, chunks: Vec<Vec<u8>>) {
        let len: usize = chunks.iter().map(Vec::len).sum();
        let mut steps = vec![
            Step::Status(200),
            Step::Headers(vec![("content-length", len.to_string())]),
        ];
        steps.extend(chunks.into_iter().map(Step::Chunk));
        steps.push(Step::Complete);
        self.script(url, steps);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub(crate) fn uploaded(&self, url: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(url).cloned()
    }

    fn run(&self, request: HttpRequest, handler: &mut dyn ResponseHandler) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(request.url.clone());

        if let Some(mut body) = request.body {
            if handler.on_headers_written() == Control::Abort {
                return;
            }
            let mut sent = Vec::new();
            let result = match body.strategy {
                BodyStrategy::Buffered { chunk_size } => {
                    let mut buf = vec![0u8; chunk_size.max(1)];
                    loop {
                        match body.source.read(&mut buf) {
                            Ok((n, state)) => {
                                sent.extend_from_slice(&buf[..n]);
                                if state == BodyState::Stop {
                                    break Ok(());
                                }
                            }
                            Err(e) => break Err(e),
                        }
                    }
                }
                BodyStrategy::ZeroCopy => body.source.transfer_to(&mut sent).map(|_| ()),
            };
            if let Err(e) = result {
                handler.on_error(TransportError::Other(e.to_string()));
                return;
            }
            self.uploads
                .lock()
                .unwrap()
                .insert(request.url.clone(), sent);
        }

        let script = self.scripts.lock().unwrap().get(&request.url).cloned();
        let script = script.unwrap_or_else(|| match request.kind {
            RequestKind::Get => vec![Step::Status(404), Step::Complete],
            RequestKind::Put => vec![Step::Status(201), Step::Complete],
        });

        for step in script {
            let control = match step {
                Step::Status(code) => handler.on_status_received(code),
                Step::Headers(pairs) => {
                    let mut headers = HeaderMap::new();
                    for (name, value) in pairs {
                        headers.insert(
                            HeaderName::from_static(name),
                            HeaderValue::from_str(&value).unwrap(),
                        );
                    }
                    handler.on_headers_received(&headers)
                }
                Step::Chunk(bytes) => handler.on_body_part(&bytes),
                Step::Error(message) => {
                    handler.on_error(TransportError::Other(message));
                    return;
                }
                Step::Complete => {
                    handler.on_completed();
                    return;
                }
            };
            if control == Control::Abort {
                return;
            }
        }
    }
}

impl Transport for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
        handler: &'a mut dyn ResponseHandler,
    ) -> TransportFuture<'a> {
        Box::pin(async move { self.run(request, handler) })
    }

    fn is_secure(&self, _url: &str) -> bool {
        self.secure
    }
}

/// Repository served over HTTP from memory. GET answers stored content or
/// 404; PUT stores the body and answers 201. Paths are keyed relative to
/// [`url`](Self::url).
pub(crate) struct MockRepository {
    base_url: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    statuses: Arc<Mutex<HashMap<String, u16>>>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockRepository {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let files: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let statuses: Arc<Mutex<HashMap<String, u16>>> = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let state = (
            Arc::clone(&files),
            Arc::clone(&statuses),
            Arc::clone(&requests),
        );
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (files, statuses, requests) = (
                    Arc::clone(&state.0),
                    Arc::clone(&state.1),
                    Arc::clone(&state.2),
                );
                tokio::spawn(async move {
                    let _ = serve_connection(stream, files, statuses, requests).await;
                });
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}/repo"),
            files,
            statuses,
            requests,
            handle,
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn put_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.into());
    }

    /// Answers every request for `path` with `status` and an empty body.
    pub(crate) fn fail_with(&self, path: &str, status: u16) {
        self.statuses
            .lock()
            .unwrap()
            .insert(path.to_string(), status);
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// `"<METHOD> <path>"` per request received.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockRepository {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    statuses: Arc<Mutex<HashMap<String, u16>>>,
    requests: Arc<Mutex<Vec<String>>>,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut tmp = vec![0u8; 8192];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH.as_str()))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&tmp[..n]);
    }

    let key = target
        .strip_prefix("/repo/")
        .unwrap_or(&target)
        .to_string();
    requests.lock().unwrap().push(format!("{method} {key}"));

    let forced = statuses.lock().unwrap().get(&key).copied();
    let (status, payload) = match (forced, method.as_str()) {
        (Some(code), _) => (code, Vec::new()),
        (None, "GET") => {
            let stored = files.lock().unwrap().get(&key).cloned();
            match stored {
                Some(content) => (200, content),
                None => (404, Vec::new()),
            }
        }
        (None, "PUT") => {
            files.lock().unwrap().insert(key, body);
            (201, Vec::new())
        }
        _ => (405, Vec::new()),
    };

    let head = format!(
        "HTTP/1.1 {status} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.shutdown().await
}

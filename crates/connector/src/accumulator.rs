use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::Path;

use reqwest::header::HeaderMap;

/// Upper bound of the in-memory sink. Checksum siblings and error bodies
/// are tiny; anything past this is dropped.
pub const MAX_MEMORY_BODY: usize = 64 * 1024;

/// Write buffer of the file sink, so most body parts are copied in memory
/// rather than written one syscall each.
const FILE_BUFFER: usize = 256 * 1024;

/// Where response body bytes go.
#[derive(Debug)]
enum ResponseSink {
    Memory(Vec<u8>),
    File(BufWriter<File>),
}

/// Status, headers and body sink of one response.
#[derive(Debug)]
pub struct ResponseAccumulator {
    status: Option<u16>,
    headers: HeaderMap,
    sink: ResponseSink,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAccumulator {
    /// Starts with an empty memory sink.
    pub fn new() -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            sink: ResponseSink::Memory(Vec::new()),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Records the status and discards any body buffered for an earlier
    /// response.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
        if let ResponseSink::Memory(buf) = &mut self.sink {
            buf.clear();
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_headers(&mut self, headers: &HeaderMap) {
        self.headers = headers.clone();
    }

    /// Switches the sink to `path`, creating parent directories and
    /// truncating an existing file.
    pub fn bind_file(&mut self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        self.sink = ResponseSink::File(BufWriter::with_capacity(FILE_BUFFER, file));
        Ok(())
    }

    pub fn is_file_bound(&self) -> bool {
        matches!(self.sink, ResponseSink::File(_))
    }

    /// Appends a body chunk. The memory sink silently stops growing at
    /// [`MAX_MEMORY_BODY`].
    pub fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            ResponseSink::File(writer) => writer.write_all(chunk),
            ResponseSink::Memory(buf) => {
                let room = MAX_MEMORY_BODY.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                Ok(())
            }
        }
    }

    /// Closes a file sink, flushing and syncing it on a blocking thread. A
    /// memory sink is left as is.
    pub async fn finish(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.sink, ResponseSink::Memory(Vec::new())) {
            ResponseSink::File(mut writer) => tokio::task::spawn_blocking(move || {
                writer.flush()?;
                writer.get_ref().sync_data()
            })
            .await
            .map_err(io::Error::other)?,
            memory => {
                self.sink = memory;
                Ok(())
            }
        }
    }

    /// Bytes held by the memory sink. Empty once a file is bound.
    pub fn body(&self) -> &[u8] {
        match &self.sink {
            ResponseSink::Memory(buf) => buf,
            ResponseSink::File(_) => &[],
        }
    }

    /// Consumes the accumulator, returning the memory body.
    pub fn into_body(self) -> Vec<u8> {
        match self.sink {
            ResponseSink::Memory(buf) => buf,
            ResponseSink::File(_) => Vec::new(),
        }
    }

    /// Short printable excerpt of the memory body for error messages.
    pub fn detail(&self) -> String {
        const MAX_DETAIL: usize = 256;
        let text = String::from_utf8_lossy(self.body());
        let text = text.trim();
        match text.char_indices().nth(MAX_DETAIL) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        }
    }
}

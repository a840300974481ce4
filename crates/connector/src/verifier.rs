//! Download verification against sibling checksum resources.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use artifact_transfer::checksum::{self, ChecksumAlgorithm, ChecksumFailure};
use artifact_transfer::{ChecksumPolicy, TransferError, TransferTracker};
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::accumulator::ResponseAccumulator;
use crate::error::TransportError;
use crate::transport::{Control, HttpRequest, ResponseHandler, Transport};

/// Checks a completed download against `<url>.<ext>` siblings, trying the
/// configured algorithms in order.
pub struct ChecksumVerifier {
    algorithms: Vec<Arc<dyn ChecksumAlgorithm>>,
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::new(checksum::default_algorithms())
    }
}

impl ChecksumVerifier {
    pub fn new(algorithms: Vec<Arc<dyn ChecksumAlgorithm>>) -> Self {
        Self { algorithms }
    }

    pub fn algorithms(&self) -> &[Arc<dyn ChecksumAlgorithm>] {
        &self.algorithms
    }

    /// Applies `policy` to the download tracked by `tracker`.
    ///
    /// `Warn` reports a failure as CORRUPTED and succeeds. `Fail` empties the
    /// destination file and returns the error.
    pub async fn verify(
        &self,
        transport: &dyn Transport,
        tracker: &TransferTracker,
        policy: ChecksumPolicy,
    ) -> Result<(), TransferError> {
        if policy == ChecksumPolicy::Ignore {
            return Ok(());
        }

        let resource = tracker.resource();
        let file = resource.file();
        let Err(error) = self.check(transport, &resource.url(), file).await else {
            return Ok(());
        };

        match policy {
            ChecksumPolicy::Warn => {
                warn!(resource = %resource, %error, "checksum verification failed, keeping file");
                tracker.corrupted(&error);
                Ok(())
            }
            _ => {
                warn!(resource = %resource, %error, "checksum verification failed");
                if let Err(e) = truncate(file) {
                    warn!(path = %file.display(), error = %e, "failed to empty corrupt download");
                }
                Err(error)
            }
        }
    }

    /// Compares `file` with the first retrievable sibling of `url`.
    pub async fn check(
        &self,
        transport: &dyn Transport,
        url: &str,
        file: &Path,
    ) -> Result<(), TransferError> {
        for algorithm in &self.algorithms {
            let sibling = format!("{url}.{}", algorithm.extension());
            let Some(body) = fetch_sibling(transport, &sibling).await else {
                debug!(%sibling, "checksum not retrievable");
                continue;
            };
            // A retrieved but empty sibling still decides, as a mismatch.
            let expected = checksum::parse_checksum_body(&body).unwrap_or_default();

            let actual = digest_file(Arc::clone(algorithm), file.to_path_buf()).await?;
            if checksum::digests_match(&expected, &actual) {
                debug!(%sibling, "checksum verified");
                return Ok(());
            }
            return Err(ChecksumFailure::Mismatch {
                algorithm: algorithm.extension().to_string(),
                expected,
                actual,
            }
            .into());
        }
        Err(ChecksumFailure::Unavailable.into())
    }
}

impl std::fmt::Debug for ChecksumVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let exts: Vec<&str> = self.algorithms.iter().map(|a| a.extension()).collect();
        f.debug_struct("ChecksumVerifier")
            .field("algorithms", &exts)
            .finish()
    }
}

async fn digest_file(
    algorithm: Arc<dyn ChecksumAlgorithm>,
    path: PathBuf,
) -> Result<String, TransferError> {
    tokio::task::spawn_blocking(move || algorithm.digest_file(&path))
        .await
        .map_err(|e| TransferError::Io(io::Error::other(e)))?
}

fn truncate(path: &Path) -> io::Result<()> {
    File::options().write(true).open(path)?.set_len(0)
}

/// Fetches a sibling into memory. `None` unless the exchange completed
/// with a 2xx status.
async fn fetch_sibling(transport: &dyn Transport, url: &str) -> Option<Vec<u8>> {
    let mut fetch = SiblingFetch::default();
    transport.execute(HttpRequest::get(url), &mut fetch).await;
    if fetch.completed && fetch.response.is_success() {
        Some(fetch.response.into_body())
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct SiblingFetch {
    response: ResponseAccumulator,
    completed: bool,
}

impl ResponseHandler for SiblingFetch {
    fn on_status_received(&mut self, status: u16) -> Control {
        self.response.set_status(status);
        if self.response.is_success() {
            Control::Continue
        } else {
            Control::Abort
        }
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Control {
        self.response.set_headers(headers);
        Control::Continue
    }

    fn on_body_part(&mut self, chunk: &[u8]) -> Control {
        match self.response.append(chunk) {
            Ok(()) => Control::Continue,
            Err(_) => Control::Abort,
        }
    }

    fn on_error(&mut self, error: TransportError) {
        debug!(%error, "checksum fetch failed");
    }

    fn on_completed(&mut self) {
        self.completed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, Step};
    use artifact_transfer::{
        EventBus, EventKind, RequestKind, TransferEvent, TransferResource, listener_fn,
    };
    use std::sync::Mutex;
    use tempfile::TempDir;

    const URL: &str = "http://repo.test/maven/gid/aid/1.0/aid-1.0.jar";
    const SHA1: &str = "1e5dcbb59b753cb1d46e234d8f6180285b8b86ad";
    const MD5: &str = "8e5b948a454515dbabfc7eb718daa52f";

    fn downloaded(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("aid-1.0.jar");
        std::fs::write(&path, b"artifact").unwrap();
        path
    }

    fn tracker_for(path: &Path) -> (Arc<TransferTracker>, Arc<Mutex<Vec<EventKind>>>) {
        let bus = Arc::new(EventBus::new());
        let kinds: Arc<Mutex<Vec<EventKind>>> = Arc::default();
        let sink = Arc::clone(&kinds);
        bus.subscribe(listener_fn(move |e: &TransferEvent<'_>| {
            sink.lock().unwrap().push(e.kind());
            Ok(())
        }));
        let resource = Arc::new(TransferResource::new(
            "http://repo.test/maven",
            "gid/aid/1.0/aid-1.0.jar",
            path,
        ));
        (
            Arc::new(TransferTracker::new(bus, resource, RequestKind::Get)),
            kinds,
        )
    }

    #[tokio::test]
    async fn sha1_match_verifies() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.sha1"), SHA1.as_bytes());

        let verifier = ChecksumVerifier::default();
        verifier.check(&transport, URL, &path).await.unwrap();
        assert_eq!(transport.requested(), vec![format!("{URL}.sha1")]);
    }

    #[tokio::test]
    async fn falls_back_to_md5_when_sha1_missing() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.md5"), format!("{MD5}  aid-1.0.jar\n").as_bytes());

        ChecksumVerifier::default()
            .check(&transport, URL, &path)
            .await
            .unwrap();
        assert_eq!(transport.requested().len(), 2);
    }

    #[tokio::test]
    async fn unretrievable_sibling_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.script(
            &format!("{URL}.sha1"),
            vec![Step::Status(500), Step::Complete],
        );
        transport.script(
            &format!("{URL}.md5"),
            vec![Step::Error("connection reset".into())],
        );

        let err = ChecksumVerifier::default()
            .check(&transport, URL, &path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ChecksumFailed(ChecksumFailure::Unavailable)
        ));
    }

    #[tokio::test]
    async fn mismatch_does_not_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.sha1"), b"0000000000000000000000000000000000000000");
        transport.serve(&format!("{URL}.md5"), MD5.as_bytes());

        let err = ChecksumVerifier::default()
            .check(&transport, URL, &path)
            .await
            .unwrap_err();
        match err {
            TransferError::ChecksumFailed(ChecksumFailure::Mismatch {
                algorithm, actual, ..
            }) => {
                assert_eq!(algorithm, "sha1");
                assert_eq!(actual, SHA1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.requested().len(), 1);
    }

    #[tokio::test]
    async fn empty_sibling_is_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.sha1"), b"");
        transport.serve(&format!("{URL}.md5"), MD5.as_bytes());

        let err = ChecksumVerifier::default()
            .check(&transport, URL, &path)
            .await
            .unwrap_err();
        match err {
            TransferError::ChecksumFailed(ChecksumFailure::Mismatch {
                algorithm,
                expected,
                ..
            }) => {
                assert_eq!(algorithm, "sha1");
                assert!(expected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.requested(), vec![format!("{URL}.sha1")]);
    }

    #[tokio::test]
    async fn fail_policy_empties_file() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let (tracker, kinds) = tracker_for(&path);
        let transport = ScriptedTransport::new();

        let err = ChecksumVerifier::default()
            .verify(&transport, &tracker, ChecksumPolicy::Fail)
            .await
            .unwrap_err();
        assert!(err.is_checksum_failure());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert!(kinds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn warn_policy_reports_corrupted_and_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let (tracker, kinds) = tracker_for(&path);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.sha1"), b"ffffffffffffffffffffffffffffffffffffffff");

        ChecksumVerifier::default()
            .verify(&transport, &tracker, ChecksumPolicy::Warn)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"artifact");
        assert_eq!(*kinds.lock().unwrap(), vec![EventKind::Corrupted]);
    }

    #[tokio::test]
    async fn ignore_policy_skips_fetching() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let (tracker, _kinds) = tracker_for(&path);
        let transport = ScriptedTransport::new();

        ChecksumVerifier::default()
            .verify(&transport, &tracker, ChecksumPolicy::Ignore)
            .await
            .unwrap();
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn custom_algorithm_order() {
        let dir = TempDir::new().unwrap();
        let path = downloaded(&dir);
        let transport = ScriptedTransport::new();
        transport.serve(&format!("{URL}.md5"), MD5.as_bytes());

        let verifier = ChecksumVerifier::new(vec![checksum::sha256(), checksum::md5()]);
        verifier.check(&transport, URL, &path).await.unwrap();
        assert_eq!(
            transport.requested(),
            vec![format!("{URL}.sha256"), format!("{URL}.md5")]
        );
    }
}

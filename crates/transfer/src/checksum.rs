//! Pluggable checksum algorithms used to verify downloads.

use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use sha2::Digest;

use crate::TransferError;

/// Why a download failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumFailure {
    #[error("{algorithm} checksum mismatch: expected {expected}, actual {actual}")]
    Mismatch {
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("no checksum available")]
    Unavailable,
}

/// A hash function together with the file extension of its sibling
/// checksum resource (`<resource>.<extension>`).
pub trait ChecksumAlgorithm: Send + Sync {
    /// Sibling suffix without the dot, e.g. `sha1`.
    fn extension(&self) -> &str;

    /// Lower-case hex digest of the whole file.
    fn digest_file(&self, path: &Path) -> Result<String, TransferError>;

    /// Lower-case hex digest of `data`.
    fn digest_bytes(&self, data: &[u8]) -> String;
}

/// [`ChecksumAlgorithm`] over any RustCrypto [`Digest`].
pub struct DigestAlgorithm<D> {
    extension: &'static str,
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestAlgorithm<D> {
    pub const fn new(extension: &'static str) -> Self {
        Self {
            extension,
            _digest: PhantomData,
        }
    }
}

const READ_BUFFER: usize = 8192;

impl<D: Digest> ChecksumAlgorithm for DigestAlgorithm<D> {
    fn extension(&self) -> &str {
        self.extension
    }

    fn digest_file(&self, path: &Path) -> Result<String, TransferError> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = D::new();
        let mut buf = [0u8; READ_BUFFER];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn digest_bytes(&self, data: &[u8]) -> String {
        hex::encode(D::digest(data))
    }
}

pub fn sha1() -> Arc<dyn ChecksumAlgorithm> {
    Arc::new(DigestAlgorithm::<sha1::Sha1>::new("sha1"))
}

pub fn md5() -> Arc<dyn ChecksumAlgorithm> {
    Arc::new(DigestAlgorithm::<md5::Md5>::new("md5"))
}

pub fn sha256() -> Arc<dyn ChecksumAlgorithm> {
    Arc::new(DigestAlgorithm::<sha2::Sha256>::new("sha256"))
}

/// Looks up a shipped algorithm by its sibling extension.
pub fn algorithm_by_name(name: &str) -> Option<Arc<dyn ChecksumAlgorithm>> {
    match name.to_ascii_lowercase().as_str() {
        "sha1" => Some(sha1()),
        "md5" => Some(md5()),
        "sha256" => Some(sha256()),
        _ => None,
    }
}

/// Strongest first: SHA-1 (40 hex chars) before MD5 (32 hex chars).
pub fn default_algorithms() -> Vec<Arc<dyn ChecksumAlgorithm>> {
    vec![sha1(), md5()]
}

/// Extracts the digest from a sibling checksum file body.
///
/// Checksum files sometimes carry `<digest>  <filename>`; only the first
/// token counts. Returns `None` for an empty body.
pub fn parse_checksum_body(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    text.split_whitespace().next().map(str::to_ascii_lowercase)
}

/// Compares an expected and actual hex digest, ignoring case and
/// surrounding whitespace.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn known_digests_of_artifact() {
        assert_eq!(
            sha1().digest_bytes(b"artifact"),
            "1e5dcbb59b753cb1d46e234d8f6180285b8b86ad"
        );
        assert_eq!(
            md5().digest_bytes(b"artifact"),
            "8e5b948a454515dbabfc7eb718daa52f"
        );
        assert_eq!(sha256().digest_bytes(b"artifact").len(), 64);
    }

    #[test]
    fn sha1_of_empty_input() {
        assert_eq!(
            sha1().digest_bytes(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(md5().digest_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn file_digest_matches_bytes_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jar");
        let data = vec![7u8; READ_BUFFER * 3 + 11];
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&data)
            .unwrap();

        for alg in [sha1(), md5(), sha256()] {
            assert_eq!(alg.digest_file(&path).unwrap(), alg.digest_bytes(&data));
        }
    }

    #[test]
    fn digest_of_missing_file_is_io_error() {
        let err = sha1().digest_file(Path::new("/nonexistent/file.jar")).unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn parse_takes_first_token() {
        assert_eq!(
            parse_checksum_body(b"  ABCDEF0123  aid-1.0.jar\n").as_deref(),
            Some("abcdef0123")
        );
        assert_eq!(parse_checksum_body(b" \n "), None);
    }

    #[test]
    fn digest_comparison_ignores_case_and_whitespace() {
        assert!(digests_match(" ABC\n", "abc"));
        assert!(!digests_match("abc", "abd"));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(algorithm_by_name("SHA1").unwrap().extension(), "sha1");
        assert_eq!(algorithm_by_name("md5").unwrap().extension(), "md5");
        assert!(algorithm_by_name("crc32").is_none());
    }

    #[test]
    fn default_order_is_strongest_first() {
        let exts: Vec<String> = default_algorithms()
            .iter()
            .map(|a| a.extension().to_string())
            .collect();
        assert_eq!(exts, vec!["sha1", "md5"]);
    }
}

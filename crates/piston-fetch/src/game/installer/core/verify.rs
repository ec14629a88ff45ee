//! Content digest checks.
//!
//! The algorithm is picked from the length of the expected hex digest, so
//! callers can hand over whatever the descriptor declared (SHA-1 for Mojang
//! data, SHA-512 for some mod platforms) without naming it.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestKind {
    /// Infer the algorithm from a hex digest. `None` for lengths that match
    /// no supported algorithm (an MD5, a truncated value).
    pub fn for_hex(expected: &str) -> Option<Self> {
        match expected.trim().len() {
            40 => Some(DigestKind::Sha1),
            64 => Some(DigestKind::Sha256),
            128 => Some(DigestKind::Sha512),
            _ => None,
        }
    }
}

/// Incremental hasher used while streaming a download.
pub enum StreamHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamHasher {
    pub fn new(kind: DigestKind) -> Self {
        match kind {
            DigestKind::Sha1 => StreamHasher::Sha1(Sha1::new()),
            DigestKind::Sha256 => StreamHasher::Sha256(Sha256::new()),
            DigestKind::Sha512 => StreamHasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha1(h) => h.update(data),
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex of the final digest.
    pub fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Sha1(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha256(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

pub fn digest_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Hex digest of a file, read in fixed-size chunks.
pub fn file_digest(path: &Path, kind: DigestKind) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = StreamHasher::new(kind);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

pub fn sha1_file(path: &Path) -> std::io::Result<String> {
    file_digest(path, DigestKind::Sha1)
}

/// True if the file exists and matches whatever expectations were supplied.
///
/// No digest means only the size is checked; neither means existence is
/// enough. A digest of an unsupported length is ignored with a warning.
/// Read errors count as a mismatch.
pub fn verify(path: &Path, expected_digest: Option<&str>, expected_size: Option<u64>) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => return false,
    };

    if let Some(size) = expected_size {
        if meta.len() != size {
            log::debug!(
                "[verify] size mismatch for {:?}: expected {}, found {}",
                path,
                size,
                meta.len()
            );
            return false;
        }
    }

    let expected = expected_digest.map(str::trim).filter(|d| !d.is_empty());
    let Some(expected) = expected else {
        return true;
    };
    let Some(kind) = DigestKind::for_hex(expected) else {
        log::warn!(
            "[verify] unsupported digest '{}' for {:?}, checking size only",
            expected,
            path
        );
        return true;
    };

    match file_digest(path, kind) {
        Ok(actual) if digest_matches(expected, &actual) => true,
        Ok(actual) => {
            log::debug!(
                "[verify] digest mismatch for {:?}: expected {}, found {}",
                path,
                expected,
                actual
            );
            false
        }
        Err(e) => {
            log::warn!("[verify] could not read {:?}: {}", path, e);
            false
        }
    }
}

/// [`verify`] on the blocking pool, for callers on the async executor.
pub async fn verify_async(
    path: &Path,
    expected_digest: Option<&str>,
    expected_size: Option<u64>,
) -> bool {
    let path = path.to_path_buf();
    let digest = expected_digest.map(str::to_string);
    tokio::task::spawn_blocking(move || verify(&path, digest.as_deref(), expected_size))
        .await
        .unwrap_or(false)
}

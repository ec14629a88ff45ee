use crate::game::installer::config::EngineConfig;
use crate::game::installer::core::verify::{digest_matches, DigestKind, StreamHasher};
use crate::game::installer::error::FetchError;
use crate::game::installer::types::{CancelToken, ProgressReporter};
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT_ENCODING};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

/// What a delivered file must match before it may appear at its final path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
    pub digest: Option<String>,
    pub size: Option<u64>,
}

impl Expected {
    /// A digest whose length names no supported algorithm is dropped with a
    /// warning; the size is still enforced.
    pub fn new(digest: Option<&str>, size: Option<u64>) -> Self {
        let digest = digest.map(str::trim).filter(|d| !d.is_empty());
        let digest = match digest {
            Some(d) if DigestKind::for_hex(d).is_none() => {
                log::warn!("Ignoring digest '{}' of unsupported length", d);
                None
            }
            other => other.map(str::to_string),
        };
        Self { digest, size }
    }

    pub fn none() -> Self {
        Self::default()
    }

    fn check(&self, actual_digest: Option<String>, actual_size: u64) -> Result<(), FetchError> {
        if let Some(size) = self.size {
            if size != actual_size {
                return Err(FetchError::SizeMismatch {
                    expected: size,
                    actual: actual_size,
                });
            }
        }
        if let (Some(expected), Some(actual)) = (&self.digest, actual_digest) {
            if !digest_matches(expected, &actual) {
                return Err(FetchError::DigestMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn hasher(&self) -> Option<StreamHasher> {
        self.digest
            .as_deref()
            .and_then(DigestKind::for_hex)
            .map(StreamHasher::new)
    }
}

/// One request against one concrete URL.
#[derive(Debug, Clone)]
pub struct Attempt<'a> {
    pub url: &'a str,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

/// Shared HTTP client. The user agent is sent on every request; sources
/// that need a different one override it per request.
pub fn build_client(config: &EngineConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(30)))
        .build()
        .context("Failed to build HTTP client")
}

/// Unique sibling temp path, so concurrent fetches never share a file.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    target.with_file_name(format!("{}.{}.part", name, uuid::Uuid::new_v4().simple()))
}

/// Download a single URL to `target`.
///
/// Bytes go to a unique `.part` sibling, are verified against `expected`
/// and only then renamed into place. The temp file is removed on every
/// failure path, including cancellation and timeout. Returns bytes written.
pub async fn download_to_path(
    client: &Client,
    attempt: &Attempt<'_>,
    target: &Path,
    expected: &Expected,
    cancel: &CancelToken,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<u64, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    log::debug!("Downloading: {} -> {:?}", attempt.url, target);

    if let Some(parent) = target.parent() {
        create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(parent, e))?;
    }

    let tmp_path = temp_path_for(target);
    let start = Instant::now();

    let streamed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = tokio::time::timeout(
            attempt.timeout,
            stream_to_file(client, attempt, &tmp_path, expected, reporter),
        ) => match res {
            Ok(inner) => inner,
            Err(_) => Err(FetchError::Timeout { url: attempt.url.to_string() }),
        },
    };

    let written = match streamed.and_then(|(written, digest)| {
        expected.check(digest, written)?;
        Ok(written)
    }) {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&tmp_path, target).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(FetchError::io(target, e));
    }

    let secs = start.elapsed().as_secs_f64();
    log::debug!(
        "Download stats: url={}, size={} bytes, time={:.2}s, throughput={:.2} MB/s",
        attempt.url,
        written,
        secs,
        (written as f64 / 1024.0 / 1024.0) / secs.max(0.001)
    );
    Ok(written)
}

async fn stream_to_file(
    client: &Client,
    attempt: &Attempt<'_>,
    tmp_path: &Path,
    expected: &Expected,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<(u64, Option<String>), FetchError> {
    let response = send(client, attempt).await?;
    let total_size = response.content_length();

    if let (Some(want), Some(got)) = (expected.size, total_size) {
        if want != got {
            return Err(FetchError::SizeMismatch {
                expected: want,
                actual: got,
            });
        }
    }

    let mut file = File::create(tmp_path)
        .await
        .map_err(|e| FetchError::io(tmp_path, e))?;
    let mut hasher = expected.hasher();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::from_reqwest(attempt.url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(tmp_path, e))?;
        if let Some(h) = hasher.as_mut() {
            h.update(&chunk);
        }
        downloaded += chunk.len() as u64;
        if let Some(rep) = reporter {
            rep.update_bytes(downloaded, total_size);
        }
    }

    file.flush().await.map_err(|e| FetchError::io(tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| FetchError::io(tmp_path, e))?;

    Ok((downloaded, hasher.map(StreamHasher::finalize_hex)))
}

async fn send(client: &Client, attempt: &Attempt<'_>) -> Result<reqwest::Response, FetchError> {
    let request = client
        .get(attempt.url)
        .headers(attempt.headers.clone())
        .header(ACCEPT_ENCODING, "identity");
    checked(request, attempt.url).await
}

async fn checked(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, FetchError> {
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Download a URL into memory, verifying it the same way as a file.
pub async fn download_to_memory(
    client: &Client,
    attempt: &Attempt<'_>,
    expected: &Expected,
    cancel: &CancelToken,
) -> Result<Vec<u8>, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    log::debug!("Downloading to memory: {}", attempt.url);

    let fetch = async {
        let response = send(client, attempt).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(attempt.url, e))?;
        let digest = expected.hasher().map(|mut h| {
            h.update(&bytes);
            h.finalize_hex()
        });
        expected.check(digest, bytes.len() as u64)?;
        Ok(bytes.to_vec())
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = tokio::time::timeout(attempt.timeout, fetch) => match res {
            Ok(inner) => inner,
            Err(_) => Err(FetchError::Timeout { url: attempt.url.to_string() }),
        },
    }
}

/// POST a JSON body and return the raw response. Used for batch lookups
/// that have no GET form.
pub async fn post_to_memory(
    client: &Client,
    attempt: &Attempt<'_>,
    body: &serde_json::Value,
    cancel: &CancelToken,
) -> Result<Vec<u8>, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    log::debug!("Posting to: {}", attempt.url);

    let fetch = async {
        let request = client
            .post(attempt.url)
            .headers(attempt.headers.clone())
            .json(body);
        let response = checked(request, attempt.url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(attempt.url, e))?;
        Ok(bytes.to_vec())
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = tokio::time::timeout(attempt.timeout, fetch) => match res {
            Ok(inner) => inner,
            Err(_) => Err(FetchError::Timeout { url: attempt.url.to_string() }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::CancelToken;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn attempt(url: &str) -> Attempt<'_> {
        Attempt {
            url,
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(5),
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".part"))
            .collect()
    }

    #[tokio::test]
    async fn writes_verified_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("hello.txt");
        let url = format!("{}/hello", server.uri());

        let written = download_to_path(
            &Client::new(),
            &attempt(&url),
            &target,
            &Expected::new(Some(HELLO_SHA1), Some(5)),
            &CancelToken::never(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(leftovers(target.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn digest_mismatch_leaves_nothing_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("hello.txt");
        let url = format!("{}/hello", server.uri());

        let err = download_to_path(
            &Client::new(),
            &attempt(&url),
            &target,
            &Expected::new(Some(HELLO_SHA1), None),
            &CancelToken::never(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::DigestMismatch { .. }));
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn http_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let url = format!("{}/missing", server.uri());
        let err = download_to_path(
            &Client::new(),
            &attempt(&url),
            &dir.path().join("missing"),
            &Expected::none(),
            &CancelToken::never(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let url = format!("{}/slow", server.uri());
        let mut att = attempt(&url);
        att.timeout = Duration::from_millis(50);

        let err = download_to_path(
            &Client::new(),
            &att,
            &dir.path().join("slow"),
            &Expected::none(),
            &CancelToken::never(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"never".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("blob");
        let url = format!("{}/blob", server.uri());
        let (handle, token) = CancelToken::pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let err = download_to_path(
            &Client::new(),
            &attempt(&url),
            &target,
            &Expected::none(),
            &token,
            None,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn memory_download_verifies_digest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let url = format!("{}/hello", server.uri());
        let bytes = download_to_memory(
            &Client::new(),
            &attempt(&url),
            &Expected::new(Some(HELLO_SHA1), None),
            &CancelToken::never(),
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"hello");

        let err = download_to_memory(
            &Client::new(),
            &attempt(&url),
            &Expected::new(Some(&"0".repeat(40)), None),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::DigestMismatch { .. }));
    }

    #[test]
    fn temp_paths_are_unique_siblings() {
        let target = Path::new("/data/assets/objects/ab/abcdef");
        let a = temp_path_for(target);
        let b = temp_path_for(target);
        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());
        assert!(a.to_string_lossy().ends_with(".part"));
    }
}

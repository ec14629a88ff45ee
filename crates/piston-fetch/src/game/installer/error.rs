use std::path::PathBuf;

/// How a failed delivery attempt should be treated by the fallback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network failure, timeout, 404/408/429/5xx. Retry, then advance.
    Transient,
    /// Other 4xx. No retry on this source; advancing is configurable.
    ClientError,
    /// Digest or size mismatch. No retry on this source; advance.
    Integrity,
    /// Local I/O failure or cancellation. Abort the whole chain.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unreadable response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Http { status, .. } => match *status {
                404 | 408 | 429 => ErrorClass::Transient,
                s if s >= 500 => ErrorClass::Transient,
                s if (400..500).contains(&s) => ErrorClass::ClientError,
                _ => ErrorClass::Transient,
            },
            FetchError::Network { .. } | FetchError::Timeout { .. } => ErrorClass::Transient,
            FetchError::DigestMismatch { .. }
            | FetchError::SizeMismatch { .. }
            | FetchError::Decode { .. } => ErrorClass::Integrity,
            FetchError::Io { .. } | FetchError::Cancelled => ErrorClass::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// One source's contribution to a failed fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Terminal failure of a fallback chain. Attempt history is never dropped.
#[derive(Debug)]
pub struct FallbackFailure {
    pub attempted_sources: Vec<String>,
    pub errors: Vec<SourceError>,
    /// Set when the chain stopped early on a local or cancellation error.
    pub fatal: Option<FetchError>,
}

impl FallbackFailure {
    /// `[key] message; [key] message`
    pub fn joined(&self) -> String {
        if self.errors.is_empty() {
            return match &self.fatal {
                Some(e) => e.to_string(),
                None => "no download source available".to_string(),
            };
        }
        self.errors
            .iter()
            .map(|e| format!("[{}] {}", e.source, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_cancelled(&self) -> bool {
        self.fatal.as_ref().is_some_and(FetchError::is_cancelled)
    }

    /// A local error that must stop the surrounding operation, not just
    /// this resource.
    pub fn is_fatal(&self) -> bool {
        self.fatal.as_ref().is_some_and(|e| !e.is_cancelled())
    }
}

impl std::fmt::Display for FallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined())
    }
}

impl std::error::Error for FallbackFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.fatal
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error taxonomies for download, planning and launch failures
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of a single download task.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (connect, TLS, timeout, broken stream).
    #[error("network error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Non-2xx response that is not an auth failure.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// 401/403 forwarded verbatim; never retried.
    #[error("unauthorized (HTTP {status}) for {url}")]
    Unauthorized { status: u16, url: String },

    #[error("size mismatch for {}: expected {expected} bytes, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("sha1 mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("disk full while writing {}", path.display())]
    DiskFull { path: PathBuf },

    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub(crate) fn transport(url: &str, err: &reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Classify a status code. 401 and 403 carry their own variant so the
    /// operator sees an auth problem rather than a generic HTTP failure.
    pub(crate) fn from_status(url: &str, status: u16) -> Self {
        match status {
            401 | 403 => FetchError::Unauthorized {
                status,
                url: url.to_string(),
            },
            _ => FetchError::HttpStatus {
                status,
                url: url.to_string(),
            },
        }
    }

    pub(crate) fn from_io(path: &Path, err: std::io::Error) -> Self {
        // ENOSPC has no stable ErrorKind on our MSRV; match the raw errno.
        #[cfg(unix)]
        let disk_full = err.raw_os_error() == Some(libc::ENOSPC);
        #[cfg(not(unix))]
        let disk_full = err.raw_os_error() == Some(112); // ERROR_DISK_FULL

        if disk_full {
            FetchError::DiskFull {
                path: path.to_path_buf(),
            }
        } else {
            FetchError::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    /// Whether the retry loop may attempt this task again.
    /// Transport errors and 5xx/408/429 statuses qualify; 4xx, integrity,
    /// resource and cancellation failures do not. A hash mismatch gets its
    /// single clean restart outside of this classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Integrity failures (size or hash disagreement with the descriptor).
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            FetchError::SizeMismatch { .. } | FetchError::HashMismatch { .. }
        )
    }
}

/// Failure while expanding a descriptor into tasks or argument vectors.
/// These are never retried; they indicate a malformed descriptor or a bug.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(
        "conflicting tasks for {}: declared sha1 {first} vs {second}", path.display()
    )]
    Conflict {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("unknown placeholder ${{{name}}} in argument {argument:?}")]
    UnknownPlaceholder { name: String, argument: String },

    #[error("malformed descriptor: {0}")]
    BadDescriptor(String),
}

/// Failure to assemble a launch plan or spawn the child process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no usable java binary found (checked explicit setting, JAVA_HOME and PATH)")]
    JavaNotFound,

    #[error("library missing from disk: {}", path.display())]
    MissingLibrary { path: PathBuf },

    #[error("native archives disagree on entry {entry}")]
    NativeConflict { entry: String },

    #[error("bad native archive {}: {message}", path.display())]
    BadNativeArchive { path: PathBuf, message: String },

    #[error("version {version} is already being launched (lock held by pid {pid})")]
    AlreadyRunning { version: String, pid: u32 },

    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

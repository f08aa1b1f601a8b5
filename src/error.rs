// src/error.rs

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::models::ByteRange;

/// Every fatal or retryable condition a download session can run into.
///
/// The type is `Clone` so the same fatal error can be delivered to every
/// event subscriber and to `wait()`.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("Got HTTP response {0}")]
    HttpStatus(u16),
    #[error("Infinite redirect is detected at {0}")]
    RedirectLoop(String),
    #[error("HTTP response code is {status} but \"location\" is not in headers")]
    MissingLocation { status: u16 },

    #[error("Invalid output destination {}", .0.display())]
    InvalidDestination(PathBuf),
    #[error("Destination {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Invalid location {}.", .0.display())]
    InvalidLocation(PathBuf),

    #[error("Expecting maximum chunk size of {expected} but got {actual} for {}", .path.display())]
    ChunkTooLarge {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Got HTTP Status code {status} when downloading chunk {chunk}")]
    ChunkStatus { chunk: usize, status: u16 },
    #[error("Expecting HTTP Status code 206 but got {status} when downloading chunk {chunk}")]
    NotPartialContent { chunk: usize, status: u16 },
    #[error("Expecting content length of {expected} but got {actual} when downloading chunk {chunk}")]
    LengthMismatch {
        chunk: usize,
        expected: u64,
        actual: u64,
    },
    #[error("Expecting {expected} bytes but received {actual} when downloading chunk {chunk}")]
    ShortBody {
        chunk: usize,
        expected: u64,
        actual: u64,
    },
    #[error("Received more than the expected {expected} bytes when downloading chunk {chunk}")]
    LongBody { chunk: usize, expected: u64 },
    #[error("Failed to download chunk #{chunk}{}", .range.map(|r| format!(" {r}")).unwrap_or_default())]
    ChunkFailed {
        chunk: usize,
        range: Option<ByteRange>,
    },

    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for DownloadError {
    fn from(e: io::Error) -> Self {
        DownloadError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        DownloadError::Transport(e.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

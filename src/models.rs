// src/models.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

/// An inclusive `[start, end]` span of byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by this range.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for an HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistBehavior {
    /// Replace the existing file.
    Overwrite,
    /// Save next to it as `name(COPY).ext`.
    #[default]
    NewFile,
    /// Leave the existing file alone and finish without downloading.
    Ignore,
    /// Fail the session before any network activity.
    Error,
}

/// Nominal chunk size, either fixed or derived from the total size once known.
#[derive(Clone)]
pub enum ChunkSize {
    Fixed(u64),
    Computed(Arc<dyn Fn(u64) -> u64 + Send + Sync>),
}

impl ChunkSize {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(u64) -> u64 + Send + Sync + 'static,
    {
        ChunkSize::Computed(Arc::new(f))
    }

    /// Resolves the nominal size for a resource of `total` bytes. Never zero.
    pub fn resolve(&self, total: u64) -> u64 {
        let size = match self {
            ChunkSize::Fixed(size) => *size,
            ChunkSize::Computed(f) => f(total),
        };
        size.max(1)
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Fixed(1024 * 1024)
    }
}

impl fmt::Debug for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkSize::Fixed(size) => f.debug_tuple("Fixed").field(size).finish(),
            ChunkSize::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Options for a download session.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Maximum number of chunks in flight at once.
    pub connections: usize,
    pub exist_behavior: ExistBehavior,
    pub follow_redirect: bool,
    /// Extra headers sent with every request.
    pub headers: HeaderMap,
    pub chunk_size: ChunkSize,
    /// Attempts per chunk before the whole session fails.
    pub max_retry: u32,
    pub retry_delay: Duration,
    /// Added to `retry_delay` once per previous failed attempt.
    pub retry_backoff: Duration,
    /// Minimum time between two speed samples.
    pub report_interval: Duration,
    /// Probe with a one-byte ranged GET when the server rejects HEAD.
    pub head_fallback: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connections: 3,
            exist_behavior: ExistBehavior::default(),
            follow_redirect: true,
            headers: HeaderMap::new(),
            chunk_size: ChunkSize::default(),
            max_retry: 3,
            retry_delay: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(3000),
            report_interval: Duration::from_millis(2500),
            head_fallback: false,
        }
    }
}

impl DownloadOptions {
    /// Delay to wait after failed `attempt` (1-based) before the next one.
    pub fn retry_wait(&self, attempt: u32) -> Duration {
        self.retry_delay + self.retry_backoff.saturating_mul(attempt.saturating_sub(1))
    }
}

/// Description of a session, published once before any chunk is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub final_address: String,
    /// Total size in bytes, `0` when unknown.
    pub size: u64,
    /// Size of each chunk; empty when the download is not resumable.
    pub chunks: Vec<u64>,
    pub is_resume: bool,
    /// Per-chunk completion percentage at start.
    pub progress: Vec<f64>,
    pub resumable: bool,
    pub parallel: bool,
    pub headers: BTreeMap<String, String>,
    pub saved_file_path: PathBuf,
}

/// A failed chunk attempt, reported before the next attempt is scheduled.
#[derive(Debug, Clone)]
pub struct RetryInfo {
    pub chunk_id: usize,
    pub attempt: u32,
    pub error: crate::error::DownloadError,
}

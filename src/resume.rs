// src/resume.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{DownloadError, DownloadResult};
use crate::models::ByteRange;
use crate::store::ChunkStore;

/// What a previous session left on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeScan {
    /// Chunks that still need downloading, in ascending order.
    pub pending: VecDeque<usize>,
    /// Chunks whose stable file already holds the full range.
    pub complete: Vec<usize>,
}

impl ResumeScan {
    pub fn is_resume(&self) -> bool {
        !self.complete.is_empty()
    }
}

/// Checks the stable file of every planned chunk.
///
/// A file of exactly the expected length is reused. A shorter or missing one
/// is downloaded again from scratch. A longer one means the plan does not
/// match what is on disk, which is fatal.
pub async fn scan_chunks(store: &ChunkStore, ranges: &[ByteRange]) -> DownloadResult<ResumeScan> {
    let mut scan = ResumeScan::default();
    for (chunk, range) in ranges.iter().enumerate() {
        let expected = range.length();
        match store.stable_len(chunk).await? {
            Some(actual) if actual > expected => {
                return Err(DownloadError::ChunkTooLarge {
                    path: store.stable_path(chunk),
                    expected,
                    actual,
                });
            }
            Some(actual) if actual == expected => scan.complete.push(chunk),
            Some(actual) => {
                debug!(chunk, actual, expected, "discarding short chunk file");
                scan.pending.push_back(chunk);
            }
            None => scan.pending.push_back(chunk),
        }
    }
    Ok(scan)
}

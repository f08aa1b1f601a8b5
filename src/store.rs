// src/store.rs

//! On-disk layout of chunk files.
//!
//! Chunk `i` of `<savepath>` lives at `<savepath>.$$i$PART` while it is being
//! written and is renamed to `<savepath>.$$i` once its request settles
//! cleanly. Only the stable name counts when resuming. The merged file is
//! assembled at `<savepath>$PART` and renamed into place once complete.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::destination::file_stats;
use crate::error::{DownloadError, DownloadResult};

const CHUNK_MARKER: &str = ".$$";
const PART_SUFFIX: &str = "$PART";

static CHUNK_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)(?:\.\$\$[0-9]+(?:\$PART)?|\$PART)$").expect("chunk file pattern is valid")
});

/// Names and moves the chunk files belonging to one destination.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    base: PathBuf,
}

impl ChunkStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Final destination these chunks are merged into.
    pub fn destination(&self) -> &Path {
        &self.base
    }

    /// Name of a fully downloaded chunk.
    pub fn stable_path(&self, chunk: usize) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(format!("{CHUNK_MARKER}{chunk}"));
        PathBuf::from(name)
    }

    /// Name of a chunk still being written.
    pub fn partial_path(&self, chunk: usize) -> PathBuf {
        let mut name = self.stable_path(chunk).into_os_string();
        name.push(PART_SUFFIX);
        PathBuf::from(name)
    }

    /// Name the chunks are merged into before the result is renamed to
    /// [`destination`](Self::destination).
    pub fn merge_path(&self) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(PART_SUFFIX);
        PathBuf::from(name)
    }

    /// Renames the in-progress file of `chunk` to its stable name.
    pub async fn promote(&self, chunk: usize) -> DownloadResult<()> {
        tokio::fs::rename(self.partial_path(chunk), self.stable_path(chunk)).await?;
        Ok(())
    }

    /// Byte length of the stable file of `chunk`, if it exists.
    pub async fn stable_len(&self, chunk: usize) -> DownloadResult<Option<u64>> {
        Ok(file_stats(&self.stable_path(chunk)).await?.map(|s| s.len()))
    }

    /// Deletes the stable files of chunks `0..count`.
    pub async fn remove_stable(&self, count: usize) -> DownloadResult<()> {
        for chunk in 0..count {
            tokio::fs::remove_file(self.stable_path(chunk)).await?;
        }
        Ok(())
    }
}

/// Deletes leftover chunk files.
///
/// When `location` is a directory every chunk file in it goes; otherwise only
/// the chunks belonging to the file at `location` are removed (the file
/// itself need not exist, but its directory must). Returns the deleted paths.
pub async fn clean(location: impl AsRef<Path>) -> DownloadResult<Vec<PathBuf>> {
    let location = location.as_ref();
    let (folder, target) = match file_stats(location).await? {
        Some(stats) if stats.is_dir() => (location.to_path_buf(), None),
        _ => {
            let folder = location
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            match file_stats(folder).await? {
                Some(stats) if stats.is_dir() => {}
                _ => return Err(DownloadError::InvalidLocation(location.to_path_buf())),
            }
            let target = location.file_name().map(|n| n.to_string_lossy().into_owned());
            (folder.to_path_buf(), target)
        }
    };

    let mut deleted = Vec::new();
    let mut entries = tokio::fs::read_dir(&folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(captures) = CHUNK_FILE.captures(&name) else {
            continue;
        };
        if target.as_deref().is_some_and(|t| t != &captures[1]) {
            continue;
        }
        let path = entry.path();
        tokio::fs::remove_file(&path).await?;
        debug!(path = %path.display(), "removed chunk file");
        deleted.push(path);
    }
    Ok(deleted)
}

// src/builder.rs

use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::downloader::Session;
use crate::error::DownloadResult;
use crate::events::DownloadEvent;
use crate::store::ChunkStore;

/// Removes the half-merged file unless the merge was committed. Runs on error
/// returns and when the build future is dropped by a destroyed session.
struct MergeGuard {
    path: PathBuf,
    committed: bool,
}

impl MergeGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, committed: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        if !self.committed && std::fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "removed unfinished merge");
        }
    }
}

/// Concatenates chunk files `0..count` in index order into a temporary file,
/// renames it to the destination, then deletes the chunks.
///
/// Emits build progress 0 before the first chunk and after each appended
/// chunk, ending at 100. The destination is only ever written by the final
/// rename; chunk files survive until then.
pub(crate) async fn build_file(store: &ChunkStore, count: usize, session: &Session) -> DownloadResult<()> {
    session.emit(DownloadEvent::Build(0.0));

    let mut merge = MergeGuard::new(store.merge_path());
    let file = tokio::fs::File::create(merge.path()).await?;
    let mut writer = BufWriter::new(file);
    for chunk in 0..count {
        let mut source = tokio::fs::File::open(store.stable_path(chunk)).await?;
        let copied = tokio::io::copy(&mut source, &mut writer).await?;
        debug!(chunk, bytes = copied, "appended chunk");
        session.emit(DownloadEvent::Build(100.0 * (chunk + 1) as f64 / count as f64));
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    tokio::fs::rename(merge.path(), store.destination()).await?;
    merge.committed = true;

    store.remove_stable(count).await?;
    info!(path = %store.destination().display(), chunks = count, "file built");
    Ok(())
}

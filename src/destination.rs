// src/destination.rs

use std::fs::Metadata as FileStats;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::{DownloadError, DownloadResult};
use crate::models::ExistBehavior;

/// `stat` that maps a missing file to `None`.
pub(crate) async fn file_stats(path: &Path) -> DownloadResult<Option<FileStats>> {
    match tokio::fs::metadata(path).await {
        Ok(stats) => Ok(Some(stats)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Works out where the download should be saved.
///
/// A directory gets the source's file name appended. An existing file is
/// then handled according to `behavior`; `Ok(None)` means "leave it alone
/// and do nothing".
pub async fn resolve_destination(
    dest: &Path,
    url: &str,
    behavior: ExistBehavior,
) -> DownloadResult<Option<PathBuf>> {
    let mut path = std::path::absolute(dest)?;
    loop {
        let Some(stats) = file_stats(&path).await? else {
            return Ok(Some(path));
        };
        if stats.is_dir() {
            path.push(file_name_from_url(url));
            continue;
        }
        match behavior {
            ExistBehavior::Overwrite => return Ok(Some(path)),
            ExistBehavior::NewFile => path = copy_name(&path),
            ExistBehavior::Ignore => return Ok(None),
            ExistBehavior::Error => return Err(DownloadError::AlreadyExists(path)),
        }
    }
}

/// The parent of `path` must be an existing directory.
pub async fn validate(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    matches!(file_stats(parent).await, Ok(Some(stats)) if stats.is_dir())
}

/// Last non-empty path segment of `url`, or its host.
fn file_name_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.rsplit('/').find(|s| !s.is_empty()).unwrap_or("download").to_owned();
    };
    parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_owned)
        .or_else(|| parsed.host_str().map(str::to_owned))
        .unwrap_or_else(|| "download".to_owned())
}

/// `dir/name.ext` becomes `dir/name(COPY).ext`.
fn copy_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}(COPY).{}", ext.to_string_lossy()),
        None => format!("{stem}(COPY)"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_url_variants() {
        assert_eq!(file_name_from_url("http://example.com/files/a.zip"), "a.zip");
        assert_eq!(file_name_from_url("http://example.com/files/"), "files");
        assert_eq!(file_name_from_url("http://using-http.example.com"), "using-http.example.com");
    }

    #[test]
    fn copy_name_keeps_extension() {
        assert_eq!(copy_name(Path::new("/tmp/a.tar.gz")), PathBuf::from("/tmp/a.tar(COPY).gz"));
        assert_eq!(copy_name(Path::new("/tmp/blob")), PathBuf::from("/tmp/blob(COPY)"));
    }

    #[tokio::test]
    async fn directory_destination_gets_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_destination(dir.path(), "http://example.com/x/data.bin", ExistBehavior::Error)
            .await
            .unwrap();
        assert_eq!(path, Some(dir.path().join("data.bin")));
    }

    #[tokio::test]
    async fn existing_file_behaviors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"old").unwrap();
        let url = "http://example.com/data.bin";

        let overwrite = resolve_destination(&file, url, ExistBehavior::Overwrite).await.unwrap();
        assert_eq!(overwrite, Some(file.clone()));

        let ignore = resolve_destination(&file, url, ExistBehavior::Ignore).await.unwrap();
        assert_eq!(ignore, None);

        let error = resolve_destination(&file, url, ExistBehavior::Error).await;
        assert!(matches!(error, Err(DownloadError::AlreadyExists(p)) if p == file));

        std::fs::write(dir.path().join("data(COPY).bin"), b"older").unwrap();
        let new_file = resolve_destination(&file, url, ExistBehavior::NewFile).await.unwrap();
        assert_eq!(new_file, Some(dir.path().join("data(COPY)(COPY).bin")));
    }

    #[tokio::test]
    async fn validate_requires_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate(&dir.path().join("out.bin")).await);
        assert!(!validate(&dir.path().join("missing").join("out.bin")).await);
    }
}

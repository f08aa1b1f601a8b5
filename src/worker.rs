// src/worker.rs

//! Fetches one chunk, retrying with backoff, and reports to the scheduler.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, DownloadResult};
use crate::models::{ByteRange, DownloadOptions, RetryInfo};
use crate::store::ChunkStore;
use crate::transport::{Transport, TransportRequest};

/// What a worker tells the scheduler.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// `len` more bytes of `chunk` were written.
    Data { chunk: usize, len: u64 },
    /// An unranged response announced its length.
    Length { chunk: usize, len: u64 },
    /// An attempt failed; the bytes it wrote are void.
    Retry(RetryInfo),
    /// The chunk is on disk under its stable name.
    Completed { chunk: usize },
    /// Every attempt failed.
    Failed { chunk: usize, error: DownloadError },
}

impl WorkerMessage {
    pub fn chunk(&self) -> usize {
        match self {
            WorkerMessage::Data { chunk, .. }
            | WorkerMessage::Length { chunk, .. }
            | WorkerMessage::Completed { chunk }
            | WorkerMessage::Failed { chunk, .. } => *chunk,
            WorkerMessage::Retry(info) => info.chunk_id,
        }
    }
}

/// A single chunk download task.
///
/// `range` is `None` when the whole resource is fetched with one plain GET.
pub(crate) struct DownloadWorker<T> {
    pub chunk: usize,
    pub range: Option<ByteRange>,
    pub address: Arc<str>,
    pub transport: Arc<T>,
    pub headers: HeaderMap,
    pub store: ChunkStore,
    pub options: Arc<DownloadOptions>,
    pub tx: UnboundedSender<WorkerMessage>,
    pub cancel: CancellationToken,
}

impl<T: Transport> DownloadWorker<T> {
    /// Runs attempts until one succeeds, retries run out, or the session is
    /// cancelled. Cancellation ends the task without a message.
    pub async fn run(self) {
        let attempts = self.options.max_retry.max(1);
        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.fetch_once() => result,
            };

            let error = match result {
                Ok(()) => {
                    debug!(chunk = self.chunk, attempt, "chunk complete");
                    let _ = self.tx.send(WorkerMessage::Completed { chunk: self.chunk });
                    return;
                }
                Err(error) => error,
            };

            warn!(chunk = self.chunk, attempt, %error, "chunk attempt failed");
            let _ = self.tx.send(WorkerMessage::Retry(RetryInfo {
                chunk_id: self.chunk,
                attempt,
                error,
            }));

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.options.retry_wait(attempt)) => {}
                }
            }
        }

        let _ = self.tx.send(WorkerMessage::Failed {
            chunk: self.chunk,
            error: DownloadError::ChunkFailed {
                chunk: self.chunk,
                range: self.range,
            },
        });
    }

    /// One request for the chunk, streamed into its in-progress file and
    /// promoted to the stable name when the body ends cleanly.
    async fn fetch_once(&self) -> DownloadResult<()> {
        let mut request = TransportRequest::get(self.address.as_ref(), self.headers.clone());
        if let Some(range) = self.range {
            request = request.with_range(range);
        }
        let response = self.transport.send(request).await?;

        let status = response.status;
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::ChunkStatus {
                chunk: self.chunk,
                status: status.as_u16(),
            });
        }

        let announced = response.content_length();
        let expected = match self.range {
            Some(range) => {
                let expected = range.length();
                if let Some(actual) = announced.filter(|&len| len != expected) {
                    return Err(DownloadError::LengthMismatch {
                        chunk: self.chunk,
                        expected,
                        actual,
                    });
                }
                if status != StatusCode::PARTIAL_CONTENT {
                    return Err(DownloadError::NotPartialContent {
                        chunk: self.chunk,
                        status: status.as_u16(),
                    });
                }
                Some(expected)
            }
            None => {
                if let Some(len) = announced {
                    let _ = self.tx.send(WorkerMessage::Length {
                        chunk: self.chunk,
                        len,
                    });
                }
                announced
            }
        };

        let file = tokio::fs::File::create(self.store.partial_path(self.chunk)).await?;
        let mut writer = BufWriter::new(file);
        let mut body = response.body;
        let mut received = 0u64;
        while let Some(data) = body.next().await {
            let data = data?;
            received += data.len() as u64;
            if let Some(expected) = expected.filter(|&expected| received > expected) {
                return Err(DownloadError::LongBody {
                    chunk: self.chunk,
                    expected,
                });
            }
            writer.write_all(&data).await?;
            let _ = self.tx.send(WorkerMessage::Data {
                chunk: self.chunk,
                len: data.len() as u64,
            });
        }
        writer.flush().await?;
        drop(writer);

        if let Some(expected) = expected.filter(|&expected| received < expected) {
            return Err(DownloadError::ShortBody {
                chunk: self.chunk,
                expected,
                actual: received,
            });
        }

        self.store.promote(self.chunk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    /// Answers every request with the same status and body.
    struct Fixed {
        status: StatusCode,
        body: &'static [u8],
        content_length: Option<u64>,
    }

    impl Transport for Fixed {
        async fn send(&self, _request: TransportRequest) -> DownloadResult<TransportResponse> {
            let body = Bytes::from_static(self.body);
            let mut headers = HeaderMap::new();
            if let Some(len) = self.content_length {
                headers.insert(reqwest::header::CONTENT_LENGTH, len.into());
            }
            Ok(TransportResponse {
                status: self.status,
                headers,
                body: Box::pin(futures_util::stream::iter([DownloadResult::Ok(body)])),
            })
        }
    }

    async fn run_worker(transport: Fixed, range: ByteRange, max_retry: u32) -> Vec<WorkerMessage> {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let worker = DownloadWorker {
            chunk: 0,
            range: Some(range),
            address: Arc::from("http://example.com/f"),
            transport: Arc::new(transport),
            headers: HeaderMap::new(),
            store: ChunkStore::new(dir.path().join("f")),
            options: Arc::new(DownloadOptions {
                max_retry,
                retry_delay: Duration::from_millis(1),
                retry_backoff: Duration::ZERO,
                ..Default::default()
            }),
            tx,
            cancel: CancellationToken::new(),
        };
        worker.run().await;

        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn short_body_is_retried_then_fails() {
        let transport = Fixed {
            status: StatusCode::PARTIAL_CONTENT,
            body: b"abc",
            content_length: None,
        };
        let messages = run_worker(transport, ByteRange::new(0, 9), 2).await;

        let retries: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Retry(info) => Some(&info.error),
                _ => None,
            })
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(matches!(
            retries[0],
            DownloadError::ShortBody { expected: 10, actual: 3, .. }
        ));
        assert!(matches!(
            messages.last(),
            Some(WorkerMessage::Failed {
                error: DownloadError::ChunkFailed { chunk: 0, .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn ranged_request_requires_partial_content() {
        let transport = Fixed {
            status: StatusCode::OK,
            body: b"0123456789",
            content_length: None,
        };
        let messages = run_worker(transport, ByteRange::new(0, 9), 1).await;
        assert!(matches!(
            messages.first(),
            Some(WorkerMessage::Retry(RetryInfo {
                error: DownloadError::NotPartialContent { status: 200, .. },
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn matching_body_is_promoted() {
        let transport = Fixed {
            status: StatusCode::PARTIAL_CONTENT,
            body: b"0123456789",
            content_length: None,
        };
        let messages = run_worker(transport, ByteRange::new(0, 9), 1).await;
        assert!(matches!(messages.first(), Some(WorkerMessage::Data { chunk: 0, len: 10 })));
        assert!(matches!(messages.last(), Some(WorkerMessage::Completed { chunk: 0 })));
    }

    #[tokio::test]
    async fn announced_length_must_match_range() {
        let transport = Fixed {
            status: StatusCode::PARTIAL_CONTENT,
            body: b"0123456789",
            content_length: Some(12),
        };
        let messages = run_worker(transport, ByteRange::new(0, 9), 1).await;
        assert!(matches!(
            messages.first(),
            Some(WorkerMessage::Retry(RetryInfo {
                error: DownloadError::LengthMismatch { expected: 10, actual: 12, .. },
                ..
            }))
        ));
        assert!(!messages.iter().any(|m| matches!(m, WorkerMessage::Data { .. })));
    }

    #[tokio::test]
    async fn body_longer_than_range_is_rejected() {
        let transport = Fixed {
            status: StatusCode::PARTIAL_CONTENT,
            body: b"0123456789X",
            content_length: None,
        };
        let messages = run_worker(transport, ByteRange::new(0, 9), 2).await;

        let retries: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Retry(info) => Some(&info.error),
                _ => None,
            })
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries
            .iter()
            .all(|e| matches!(e, DownloadError::LongBody { expected: 10, .. })));
        assert!(!messages.iter().any(|m| matches!(m, WorkerMessage::Completed { .. })));
        assert!(matches!(messages.last(), Some(WorkerMessage::Failed { chunk: 0, .. })));
    }
}

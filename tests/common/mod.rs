#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rangedl::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Method, StatusCode};

pub const BASE: &str = "http://mock.test";

/// One request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub range: Option<String>,
}

/// In-memory HTTP server serving one body at `/file.bin`.
pub struct MockTransport {
    body: Bytes,
    accept_ranges: bool,
    head_status: Option<StatusCode>,
    redirects: HashMap<String, String>,
    failures: AtomicUsize,
    piece: usize,
    piece_delay: Option<Duration>,
    overlong: bool,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Bytes::from(body),
            accept_ranges: true,
            head_status: None,
            redirects: HashMap::new(),
            failures: AtomicUsize::new(0),
            piece: 4096,
            piece_delay: None,
            overlong: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stops advertising `accept-ranges: bytes`.
    pub fn without_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    /// Answers every HEAD with `status`.
    pub fn reject_head(mut self, status: StatusCode) -> Self {
        self.head_status = Some(status);
        self
    }

    /// `from` answers 302 pointing at `to`. Both are paths.
    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(url(from), url(to));
        self
    }

    /// `from` answers 302 with no `location` header.
    pub fn redirect_without_location(mut self, from: &str) -> Self {
        self.redirects.insert(url(from), String::new());
        self
    }

    /// Ranged GETs return one byte past the range and omit `content-length`.
    pub fn overlong_ranges(mut self) -> Self {
        self.overlong = true;
        self
    }

    /// The next `count` body GETs answer 503.
    pub fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Streams bodies in `piece`-byte pieces, sleeping `delay` before each.
    pub fn throttled(mut self, piece: usize, delay: Duration) -> Self {
        self.piece = piece;
        self.piece_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    fn respond(&self, status: StatusCode, headers: HeaderMap, body: Bytes) -> TransportResponse {
        let pieces: Vec<Bytes> = (0..body.len())
            .step_by(self.piece.max(1))
            .map(|start| body.slice(start..(start + self.piece).min(body.len())))
            .collect();
        let delay = self.piece_delay;
        let stream = futures_util::stream::iter(pieces).then(move |piece| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            DownloadResult::Ok(piece)
        });
        TransportResponse {
            status,
            headers,
            body: Box::pin(stream),
        }
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.accept_ranges {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        headers
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> DownloadResult<TransportResponse> {
        let range = request
            .headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.calls.lock().push(Call {
            method: request.method.clone(),
            url: request.url.clone(),
            range: range.clone(),
        });

        if let Some(target) = self.redirects.get(&request.url) {
            let mut headers = HeaderMap::new();
            if !target.is_empty() {
                headers.insert(LOCATION, HeaderValue::from_str(target).unwrap());
            }
            return Ok(self.respond(StatusCode::FOUND, headers, Bytes::new()));
        }
        if request.url != url("/file.bin") {
            return Ok(self.respond(StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new()));
        }

        let mut headers = self.base_headers();
        let total = self.body.len();

        if request.method == Method::HEAD {
            if let Some(status) = self.head_status {
                return Ok(self.respond(status, HeaderMap::new(), Bytes::new()));
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
            return Ok(self.respond(StatusCode::OK, headers, Bytes::new()));
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Ok(self.respond(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), Bytes::new()));
        }

        match range.as_deref().and_then(parse_range) {
            Some((start, end)) if self.accept_ranges => {
                let end = end.min(total - 1);
                let slice = if self.overlong {
                    let mut padded = self.body.slice(start..=end).to_vec();
                    padded.push(0);
                    Bytes::from(padded)
                } else {
                    let slice = self.body.slice(start..=end);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(slice.len()));
                    slice
                };
                headers.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
                );
                Ok(self.respond(StatusCode::PARTIAL_CONTENT, headers, slice))
            }
            _ => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
                Ok(self.respond(StatusCode::OK, headers, self.body.clone()))
            }
        }
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Fast retries so failure paths finish quickly.
pub fn options(connections: usize) -> DownloadOptions {
    DownloadOptions {
        connections,
        retry_delay: Duration::from_millis(5),
        retry_backoff: Duration::from_millis(5),
        report_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

pub fn chunk_path(dest: &Path, chunk: usize) -> PathBuf {
    PathBuf::from(format!("{}.$${chunk}", dest.display()))
}

/// Names of every entry in `dir`, sorted.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Drains events already delivered to `rx`.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

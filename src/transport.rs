// src/transport.rs

//! Single request/response HTTP abstraction.
//!
//! The session only ever needs "send one request, look at the status and
//! headers, stream the body". Keeping that behind [`Transport`] lets the
//! engine run against an in-memory server in tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, RANGE};
use reqwest::{redirect, Client, Method, StatusCode};

use crate::error::{DownloadError, DownloadResult};
use crate::models::ByteRange;

/// Response body as a stream of byte chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = DownloadResult<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
        }
    }

    pub fn head(url: impl Into<String>, headers: HeaderMap) -> Self {
        Self::new(Method::HEAD, url, headers)
    }

    pub fn get(url: impl Into<String>, headers: HeaderMap) -> Self {
        Self::new(Method::GET, url, headers)
    }

    /// Adds a `Range` header, replacing any caller-supplied one.
    pub fn with_range(mut self, range: ByteRange) -> Self {
        if let Ok(value) = HeaderValue::from_str(&range.header_value()) {
            self.headers.insert(RANGE, value);
        }
        self
    }
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Issues one HTTP request and hands back its status, headers and body.
///
/// Implementations must not follow redirects on their own; the resolver
/// does that so it can detect loops. Dropping the returned body aborts the
/// request.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = DownloadResult<TransportResponse>> + Send;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = DownloadResult<TransportResponse>> + Send {
        (**self).send(request)
    }
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> DownloadResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("rangedl/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client. It should be built with
    /// `redirect::Policy::none()`.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> DownloadResult<TransportResponse> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::from));

        Ok(TransportResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_is_added() {
        let request = TransportRequest::get("http://example.com/a", HeaderMap::new())
            .with_range(ByteRange::new(5, 9));
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.headers.get(RANGE).unwrap(), "bytes=5-9");
    }

    #[test]
    fn range_header_replaces_caller_range() {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
        headers.insert("x-token", HeaderValue::from_static("abc"));
        let request = TransportRequest::get("http://example.com/a", headers)
            .with_range(ByteRange::new(10, 19));
        assert_eq!(request.headers.get(RANGE).unwrap(), "bytes=10-19");
        assert_eq!(request.headers.get("x-token").unwrap(), "abc");
    }

    #[test]
    fn content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        assert_eq!(content_length(&headers), Some(1234));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("nope"));
        assert_eq!(content_length(&headers), None);
    }
}

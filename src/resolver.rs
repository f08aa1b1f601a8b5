// src/resolver.rs

//! Finds the terminal address of a resource and its response headers.

use std::collections::{BTreeMap, HashSet};

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};
use crate::models::ByteRange;
use crate::transport::{content_length, Transport, TransportRequest};

/// Status and headers of a metadata probe. The body is never read.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Outcome of metadata resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub address: String,
    /// `None` when a redirect target refused the probe; the download then
    /// falls back to a single plain GET.
    pub headers: Option<HeaderMap>,
}

impl Resolved {
    /// Total size of the resource, preferring the `Content-Range` total of
    /// a ranged probe over `Content-Length`.
    pub fn size(&self) -> Option<u64> {
        let headers = self.headers.as_ref()?;
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .or_else(|| content_length(headers))
    }

    pub fn accepts_ranges(&self) -> bool {
        self.headers
            .as_ref()
            .and_then(|h| h.get(ACCEPT_RANGES))
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
    }

    /// Headers as a lower-case name to value map; repeated headers are
    /// joined with `", "`.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let Some(headers) = &self.headers else {
            return map;
        };
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            map.entry(name.as_str().to_owned())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        map
    }
}

/// Probes `address` with HEAD.
///
/// A HEAD answered with 403 (typical for method-bound signed URLs), or with
/// any client/server error when `head_fallback` is set, is retried once as
/// a GET for the first byte only.
pub async fn request_header<T: Transport>(
    transport: &T,
    address: &str,
    headers: &HeaderMap,
    head_fallback: bool,
) -> DownloadResult<ProbeResponse> {
    let response = transport
        .send(TransportRequest::head(address, headers.clone()))
        .await?;
    let status = response.status;

    let rejected = status == StatusCode::FORBIDDEN
        || (head_fallback && (status.is_client_error() || status.is_server_error()));
    if !rejected {
        return Ok(ProbeResponse {
            status,
            headers: response.headers,
        });
    }

    debug!(address, %status, "HEAD rejected, probing with ranged GET");
    let response = transport
        .send(TransportRequest::get(address, headers.clone()).with_range(ByteRange::new(0, 0)))
        .await?;
    Ok(ProbeResponse {
        status: response.status,
        headers: response.headers,
    })
}

/// Follows redirects from `address` until a 200/206 answer.
///
/// Revisiting an address is an error, as is a 3xx without `location`.
pub async fn follow_redirect<T: Transport>(
    transport: &T,
    address: &str,
    headers: &HeaderMap,
    head_fallback: bool,
) -> DownloadResult<Resolved> {
    let origin = normalize(address)?;
    let mut visited = HashSet::new();
    let mut current = origin.clone();

    loop {
        if !visited.insert(current.clone()) {
            return Err(DownloadError::RedirectLoop(current));
        }

        let probe = request_header(transport, &current, headers, head_fallback).await?;
        if is_success(probe.status) {
            return Ok(Resolved {
                address: current,
                headers: Some(probe.headers),
            });
        }

        if probe.status.is_redirection() {
            let location = probe
                .headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(DownloadError::MissingLocation {
                    status: probe.status.as_u16(),
                })?;
            let next = join(&current, location)?;
            debug!(from = %current, to = %next, status = %probe.status, "following redirect");
            current = next;
        } else if current != origin {
            return Ok(Resolved {
                address: current,
                headers: None,
            });
        } else {
            return Err(DownloadError::HttpStatus(probe.status.as_u16()));
        }
    }
}

/// Single probe without following redirects; anything but 200/206 is fatal.
pub async fn resolve_direct<T: Transport>(
    transport: &T,
    address: &str,
    headers: &HeaderMap,
    head_fallback: bool,
) -> DownloadResult<Resolved> {
    let address = normalize(address)?;
    let probe = request_header(transport, &address, headers, head_fallback).await?;
    if !is_success(probe.status) {
        return Err(DownloadError::HttpStatus(probe.status.as_u16()));
    }
    Ok(Resolved {
        address,
        headers: Some(probe.headers),
    })
}

fn is_success(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT
}

fn normalize(address: &str) -> DownloadResult<String> {
    Url::parse(address)
        .map(String::from)
        .map_err(|e| DownloadError::InvalidUrl(format!("{address}: {e}")))
}

fn join(base: &str, location: &str) -> DownloadResult<String> {
    let base = Url::parse(base).map_err(|e| DownloadError::InvalidUrl(format!("{base}: {e}")))?;
    base.join(location)
        .map(String::from)
        .map_err(|e| DownloadError::InvalidUrl(format!("{location}: {e}")))
}

/// Total from `bytes <start>-<end>/<total>`; `None` for `*`.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

//! Single-hop upstream fetch with bounded redirect following.
//!
//! [`UpstreamFetcher::fetch`] issues one logical request: it injects the
//! resolved identity headers, forwards an inbound `Range`, follows
//! 301/302/307/308 responses itself (reqwest's own redirect policy is
//! disabled) and bounds every attempt with a per-mode timeout.
//!
//! TLS certificate validation is switched off on purpose. Origins serving
//! HLS are frequently self-signed or present certificates for a different
//! host, and the relay's job is to reach them regardless. Traffic between
//! the relay and an origin is therefore not authenticated.

use crate::config::{Config, MAX_TIMEOUT};
use crate::error::{ProxyError, Result};
use crate::headers::HeaderSet;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION, RANGE};
use reqwest::{Client, Method, StatusCode};
use std::error::Error as _;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use url::Url;

/// What the caller intends to do with the body; selects timeout and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Buffer the whole body within the attempt deadline
    Playlist,
    /// Hand back a live byte stream once headers arrive
    Segment,
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    /// Absolute, scheme-qualified target
    pub url: Url,
    pub headers: HeaderSet,
    /// Inbound `Range` header, forwarded verbatim
    pub range: Option<HeaderValue>,
}

pub enum UpstreamBody {
    Buffered(Bytes),
    Stream(BoxStream<'static, reqwest::Result<Bytes>>),
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            UpstreamBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Final (non-redirect) upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL that produced this response, after redirects
    pub url: Url,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Materialize the body, collecting a stream if necessary.
    pub async fn into_bytes(self, limit: Duration) -> Result<Bytes> {
        match self.body {
            UpstreamBody::Buffered(bytes) => Ok(bytes),
            UpstreamBody::Stream(mut stream) => {
                let deadline = deadline_after(limit);
                let mut buf = Vec::new();
                loop {
                    match timeout_at(deadline, stream.next()).await {
                        Err(_) => return Err(ProxyError::Timeout(limit)),
                        Ok(None) => break,
                        Ok(Some(chunk)) => {
                            let chunk = chunk.map_err(|e| network_error(&e))?;
                            buf.extend_from_slice(&chunk);
                        }
                    }
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Shared upstream client plus the per-attempt bounds from [`Config`].
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: Client,
    playlist_timeout: Duration,
    segment_timeout: Duration,
    max_redirects: usize,
}

impl UpstreamFetcher {
    pub fn new(config: &Config) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            playlist_timeout: config.playlist_timeout,
            segment_timeout: config.segment_timeout,
            max_redirects: config.max_redirects,
        })
    }

    pub fn timeout_for(&self, mode: FetchMode) -> Duration {
        match mode {
            FetchMode::Playlist => self.playlist_timeout,
            FetchMode::Segment => self.segment_timeout,
        }
    }

    /// Fetch `target`, following redirects up to the configured bound.
    ///
    /// Non-2xx, non-redirect statuses are returned as responses, not errors.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::TooManyRedirects`] when the chain exceeds the bound
    /// - [`ProxyError::Timeout`] when a single attempt exceeds its deadline
    /// - [`ProxyError::Upstream`] on connection, DNS or body read failures
    pub async fn fetch(
        &self,
        target: &TargetRequest,
        method: Method,
        mode: FetchMode,
    ) -> Result<UpstreamResponse> {
        let limit = self.timeout_for(mode);

        let mut headers = target.headers.to_header_map();
        if let Some(range) = &target.range {
            headers.insert(RANGE, range.clone());
        }

        let mut url = target.url.clone();
        let mut redirects = 0usize;

        loop {
            let deadline = deadline_after(limit);
            debug!("Upstream {} {} (redirect {})", method, url, redirects);

            let request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .send();

            let response = match timeout_at(deadline, request).await {
                Err(_) => return Err(ProxyError::Timeout(limit)),
                Ok(Err(e)) if e.is_timeout() => return Err(ProxyError::Timeout(limit)),
                Ok(Err(e)) => return Err(network_error(&e)),
                Ok(Ok(response)) => response,
            };

            let status = response.status();

            if is_redirect(status) {
                if let Some(next) = redirect_location(&url, response.headers()) {
                    if redirects >= self.max_redirects {
                        warn!(
                            "Redirect limit {} exceeded for {}",
                            self.max_redirects, target.url
                        );
                        return Err(ProxyError::TooManyRedirects {
                            limit: self.max_redirects,
                            url: target.url.to_string(),
                        });
                    }
                    redirects += 1;
                    debug!("Following {} redirect {} -> {}", status, url, next);
                    url = next;
                    continue;
                }
                warn!("{} from {} without a usable Location header", status, url);
            }

            if !status.is_success() {
                warn!("Upstream returned {} for {}", status, url);
            }

            let headers = response.headers().clone();
            let body = match mode {
                FetchMode::Playlist => {
                    let bytes = match timeout_at(deadline, response.bytes()).await {
                        Err(_) => return Err(ProxyError::Timeout(limit)),
                        Ok(Err(e)) if e.is_timeout() => return Err(ProxyError::Timeout(limit)),
                        Ok(Err(e)) => return Err(network_error(&e)),
                        Ok(Ok(bytes)) => bytes,
                    };
                    UpstreamBody::Buffered(bytes)
                }
                FetchMode::Segment => UpstreamBody::Stream(response.bytes_stream().boxed()),
            };

            return Ok(UpstreamResponse {
                status,
                headers,
                url,
                body,
            });
        }
    }
}

/// `now + limit`, saturating at [`MAX_TIMEOUT`] for limits too large to add
fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit).unwrap_or_else(|| now + MAX_TIMEOUT)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve `Location` against the URL that returned it.
fn redirect_location(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?.trim();
    if location.is_empty() {
        return None;
    }
    current.join(location).ok()
}

/// Flatten a reqwest error and its sources into one message.
pub(crate) fn network_error(e: &reqwest::Error) -> ProxyError {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ProxyError::Upstream(message)
}

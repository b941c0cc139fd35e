use crate::{
    error::Result,
    headers::HeaderOverrides,
    hls::SEGMENT_CONTENT_TYPE,
    server::{handlers::ProxyParams, state::AppState, url_validation::validate_target_url},
    upstream::{FetchMode, TargetRequest, UpstreamBody, UpstreamResponse},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, header},
    response::Response,
};
use futures_util::TryStreamExt;
use tracing::{error, info};

/// Response headers copied from the upstream segment when present
const RELAYED_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

/// `GET|HEAD /ts-proxy`: stream a segment (or key) through unmodified
///
/// An inbound `Range` header is forwarded upstream so players can seek.
pub async fn serve_segment(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let target = validate_target_url(params.url.as_deref())?;
    let overrides = HeaderOverrides::from_query(params.headers.as_deref());
    let range = headers.get(header::RANGE).cloned();

    info!(
        "Relaying segment: {}{}",
        target,
        range
            .as_ref()
            .and_then(|r| r.to_str().ok())
            .map(|r| format!(" ({r})"))
            .unwrap_or_default()
    );

    let request = TargetRequest {
        headers: state.header_policy.resolve(&overrides, &target),
        url: target,
        range,
    };

    let upstream = state
        .fetcher
        .fetch(&request, upstream_method(&method), FetchMode::Segment)
        .await?;

    Ok(relay_segment(upstream))
}

/// HEAD stays HEAD; everything else is fetched with GET
pub(crate) fn upstream_method(inbound: &Method) -> Method {
    if *inbound == Method::HEAD {
        Method::HEAD
    } else {
        Method::GET
    }
}

/// Build the client response for a segment without buffering its body.
///
/// Status is forwarded verbatim (including 206). If the upstream stream
/// fails after headers were sent, the error is logged and the connection
/// is cut; no error body can follow committed headers.
pub(crate) fn relay_segment(upstream: UpstreamResponse) -> Response {
    let UpstreamResponse {
        status,
        headers: upstream_headers,
        url,
        body,
    } = upstream;

    let body = match body {
        UpstreamBody::Buffered(bytes) => Body::from(bytes),
        UpstreamBody::Stream(stream) => Body::from_stream(stream.inspect_err(move |e| {
            error!("Segment stream from {} aborted mid-transfer: {}", url, e);
        })),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        upstream_headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(SEGMENT_CONTENT_TYPE)),
    );
    for name in RELAYED_HEADERS {
        if let Some(value) = upstream_headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use url::Url;

    fn upstream(status: StatusCode, headers: HeaderMap, body: &'static [u8]) -> UpstreamResponse {
        UpstreamResponse {
            status,
            headers,
            url: Url::parse("https://cdn.example/seg1.ts").unwrap(),
            body: UpstreamBody::Buffered(Bytes::from_static(body)),
        }
    }

    #[tokio::test]
    async fn partial_content_headers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/iso.segment"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4"));
        headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_static("bytes 100-103/1000"),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert("x-cache", HeaderValue::from_static("HIT"));

        let response = relay_segment(upstream(StatusCode::PARTIAL_CONTENT, headers, b"\x47\x40\x11\x10"));

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let h = response.headers();
        assert_eq!(h.get(header::CONTENT_TYPE).unwrap(), "video/iso.segment");
        assert_eq!(h.get(header::CONTENT_RANGE).unwrap(), "bytes 100-103/1000");
        assert_eq!(h.get(header::ACCEPT_RANGES).unwrap(), "bytes");
        assert!(h.get("x-cache").is_none());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"\x47\x40\x11\x10");
    }

    #[test]
    fn missing_content_type_defaults_to_mpeg_ts() {
        let response = relay_segment(upstream(StatusCode::OK, HeaderMap::new(), b""));
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp2t"
        );
    }

    #[test]
    fn head_is_preserved_for_upstream() {
        assert_eq!(upstream_method(&Method::HEAD), Method::HEAD);
        assert_eq!(upstream_method(&Method::GET), Method::GET);
    }
}

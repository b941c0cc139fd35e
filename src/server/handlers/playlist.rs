use crate::{
    error::Result,
    headers::HeaderOverrides,
    hls::{self, rewrite_playlist},
    server::{
        envelope::playlist_response,
        handlers::{ProxyParams, proxy_base},
        state::AppState,
        url_validation::validate_target_url,
    },
    upstream::{FetchMode, TargetRequest, UpstreamResponse},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// `GET /m3u8-proxy`: fetch a playlist and rewrite every URI it references
pub async fn serve_playlist(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let target = validate_target_url(params.url.as_deref())?;
    let overrides = HeaderOverrides::from_query(params.headers.as_deref());
    let base = proxy_base(&state.config, &headers);

    info!("Relaying playlist: {}", target);

    relay_playlist(&state, target, overrides, &base).await
}

/// Fetch `target` in playlist mode and render the result.
pub(crate) async fn relay_playlist(
    state: &AppState,
    target: Url,
    overrides: HeaderOverrides,
    base: &str,
) -> Result<Response> {
    let request = TargetRequest {
        headers: state.header_policy.resolve(&overrides, &target),
        url: target,
        range: None,
    };

    let upstream = state
        .fetcher
        .fetch(&request, Method::GET, FetchMode::Playlist)
        .await?;

    let limit = state.fetcher.timeout_for(FetchMode::Playlist);
    render_playlist(upstream, &overrides, base, limit).await
}

/// Turn an upstream response into the client response.
///
/// - non-2xx: status and body passed through with the upstream content type
/// - playlist: rewritten, served as `application/vnd.apple.mpegurl`, uncached
/// - anything else: body unchanged with its original content type
pub(crate) async fn render_playlist(
    upstream: UpstreamResponse,
    overrides: &HeaderOverrides,
    base: &str,
    limit: Duration,
) -> Result<Response> {
    let status = upstream.status;
    let content_type = upstream.content_type().map(str::to_string);
    let playlist_url = upstream.url.clone();
    let body = upstream.into_bytes(limit).await?;

    if status.is_success()
        && hls::looks_like_playlist(content_type.as_deref(), playlist_url.as_str(), &body)
    {
        if let Err(e) = std::str::from_utf8(&body) {
            debug!(
                "Playlist {} is not valid UTF-8 ({}), replacing invalid bytes",
                playlist_url, e
            );
        }
        let text = String::from_utf8_lossy(&body);
        let rewritten = rewrite_playlist(&text, &playlist_url, overrides, base);
        debug!(
            "Rewrote playlist {} ({} -> {} bytes)",
            playlist_url,
            body.len(),
            rewritten.len()
        );
        return Ok(playlist_response(status, rewritten));
    }

    info!(
        "Passing through {} response from {} unchanged ({} bytes)",
        status,
        playlist_url,
        body.len()
    );

    let mut response = (status, Body::from(body)).into_response();
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

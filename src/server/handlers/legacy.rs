use crate::{
    error::Result,
    headers::HeaderOverrides,
    hls,
    server::{
        handlers::{
            playlist::{relay_playlist, render_playlist},
            proxy_base,
            segment::{relay_segment, upstream_method},
        },
        state::AppState,
        url_validation::validate_target_url,
    },
    upstream::{FetchMode, TargetRequest},
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

/// Query parameters of the combined root route
#[derive(Debug, Default, Deserialize)]
pub struct LegacyParams {
    pub url: Option<String>,
    pub referer: Option<String>,
}

/// `GET /`: usage page, or the combined relay when `url` is present.
///
/// `.m3u8` URLs go straight to the playlist path. Anything else is fetched
/// as a segment and only buffered for rewriting if the upstream labels it
/// as a playlist.
pub async fn serve_root(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<LegacyParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let base = proxy_base(&state.config, &headers);

    if params.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
        return Ok(usage(&base));
    }

    let target = validate_target_url(params.url.as_deref())?;

    let mut overrides = HeaderOverrides::new();
    if let Some(referer) = params.referer.filter(|r| !r.trim().is_empty()) {
        if HeaderValue::from_str(&referer).is_ok() {
            overrides.insert("Referer", referer);
        } else {
            warn!("Ignoring referer parameter: not a valid header value");
        }
    }

    if hls::is_playlist_url(target.as_str()) {
        info!("Combined route: relaying playlist {}", target);
        return relay_playlist(&state, target, overrides, &base).await;
    }

    info!("Combined route: relaying {}", target);

    let request = TargetRequest {
        headers: state.header_policy.resolve(&overrides, &target),
        url: target,
        range: headers.get(header::RANGE).cloned(),
    };

    let upstream = state
        .fetcher
        .fetch(&request, upstream_method(&method), FetchMode::Segment)
        .await?;

    if method != Method::HEAD
        && upstream.status.is_success()
        && hls::content_type_is_playlist(upstream.content_type())
    {
        let limit = state.fetcher.timeout_for(FetchMode::Playlist);
        return render_playlist(upstream, &overrides, &base, limit).await;
    }

    Ok(relay_segment(upstream))
}

fn usage(base: &str) -> Response {
    let text = format!(
        "\
HLS relay {version}

Routes:
  GET {base}/m3u8-proxy?url=<playlist url>&headers=<json>
      Fetch a playlist and rewrite every URI to route back through this relay.
  GET {base}/ts-proxy?url=<segment url>&headers=<json>
      Stream a segment or key through unchanged. Range requests are forwarded.
  GET {base}/?url=<url>&referer=<referer>
      Combined route: playlists are rewritten, everything else is streamed.
  GET {base}/health
      Liveness probe.

`headers` is a URL-encoded JSON object, e.g. {{\"Referer\":\"https://site.example/\"}}.
Malformed values are ignored.
",
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

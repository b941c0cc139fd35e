pub mod health;
pub mod legacy;
pub mod playlist;
pub mod segment;

use crate::config::Config;
use axum::{
    Json,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

/// Query parameters shared by `/m3u8-proxy` and `/ts-proxy`
#[derive(Debug, Default, Deserialize)]
pub struct ProxyParams {
    /// Absolute target URL
    pub url: Option<String>,
    /// URL-encoded JSON object of header overrides
    pub headers: Option<String>,
}

/// Base URL rewritten playlist links point back to.
///
/// `PUBLIC_URL` wins; otherwise the address is rebuilt from the
/// forwarded-proto/host headers (or `Host`) so the relay works behind a
/// reverse proxy without knowing its own address.
pub fn proxy_base(config: &Config, headers: &HeaderMap) -> String {
    if let Some(public_url) = &config.public_url {
        return public_url.clone();
    }

    let proto = first_value(headers, "x-forwarded-proto").unwrap_or("http");
    let host = first_value(headers, "x-forwarded-host")
        .or_else(|| first_value(headers, header::HOST.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{}", config.port));

    format!("{proto}://{host}")
}

/// First comma-separated entry of a header, trimmed
fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": format!("No route for {}", uri.path()),
            "code": "not_found",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn public_url_takes_precedence() {
        let config = Config {
            public_url: Some("https://relay.example.com".to_string()),
            ..Config::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", HeaderValue::from_static("ignored.example"));

        assert_eq!(proxy_base(&config, &headers), "https://relay.example.com");
    }

    #[test]
    fn forwarded_headers_used_behind_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("relay.example.com, lb.internal"),
        );
        headers.insert(header::HOST, HeaderValue::from_static("10.0.0.5:3000"));

        assert_eq!(
            proxy_base(&Config::default(), &headers),
            "https://relay.example.com"
        );
    }

    #[test]
    fn host_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("127.0.0.1:3000"));

        assert_eq!(
            proxy_base(&Config::default(), &headers),
            "http://127.0.0.1:3000"
        );
    }

    #[test]
    fn localhost_when_no_headers() {
        assert_eq!(
            proxy_base(&Config::default(), &HeaderMap::new()),
            "http://localhost:3000"
        );
    }
}

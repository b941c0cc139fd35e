use std::env;
use std::time::Duration;

/// Default referer used when neither the caller nor the target supplies one.
pub const DEFAULT_REFERER: &str = "https://megacloud.club/";

/// Upper bound for the per-attempt timeouts
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Fallback order for the outbound `Referer` when the caller gave none
#[derive(Clone, Debug, PartialEq)]
pub enum RefererFallback {
    /// Use the target URL's own origin, e.g. `https://cdn.example/`
    TargetOrigin,
    /// Skip straight to the configured default referer
    Fixed,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Public base URL used when building rewritten proxy URLs.
    /// When `None`, it is derived per request from the forwarded-host headers.
    pub public_url: Option<String>,
    /// Referer sent when the caller did not supply one
    pub default_referer: String,
    pub referer_fallback: RefererFallback,
    /// Per-attempt bound for playlist fetches (headers and full body)
    pub playlist_timeout: Duration,
    /// Per-attempt bound for segment fetches (until response headers arrive)
    pub segment_timeout: Duration,
    /// Maximum number of redirects followed before giving up
    pub max_redirects: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: None,
            default_referer: DEFAULT_REFERER.to_string(),
            referer_fallback: RefererFallback::TargetOrigin,
            playlist_timeout: Duration::from_secs(30),
            segment_timeout: Duration::from_secs(60),
            max_redirects: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional. Only a malformed `PORT` is fatal, the
    /// other numeric settings fall back to their defaults.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| format!("PORT must be a port number, got '{raw}': {e}"))?,
            Err(_) => defaults.port,
        };

        let host = env::var("HOST").unwrap_or(defaults.host);

        let public_url = env::var("PUBLIC_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let default_referer = env::var("DEFAULT_REFERER")
            .ok()
            .filter(|referer| !referer.trim().is_empty())
            .unwrap_or(defaults.default_referer);

        let referer_fallback = match env::var("REFERER_FALLBACK")
            .unwrap_or_else(|_| "target".to_string())
            .to_lowercase()
            .as_str()
        {
            "fixed" | "default" => RefererFallback::Fixed,
            _ => RefererFallback::TargetOrigin,
        };

        let playlist_timeout = env::var("PLAYLIST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.playlist_timeout)
            .min(MAX_TIMEOUT);

        let segment_timeout = env::var("SEGMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.segment_timeout)
            .min(MAX_TIMEOUT);

        let max_redirects = env::var("MAX_REDIRECTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_redirects);

        Ok(Config {
            host,
            port,
            public_url,
            default_referer,
            referer_fallback,
            playlist_timeout,
            segment_timeout,
            max_redirects,
        })
    }

    /// Socket address string the listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use crate::{config::Config, headers::HeaderPolicy, upstream::UpstreamFetcher};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup
    pub config: Arc<Config>,
    /// Shared upstream client for connection pooling
    pub fetcher: UpstreamFetcher,
    pub header_policy: Arc<HeaderPolicy>,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let fetcher = UpstreamFetcher::new(&config)?;
        let header_policy = HeaderPolicy::from_config(&config);

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            header_policy: Arc::new(header_policy),
            started_at: Instant::now(),
        })
    }
}

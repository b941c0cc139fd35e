use hls_relay::{config, server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A panic in one request must not look like a crash of the service;
    // tokio isolates the task, this just routes the report through tracing.
    std::panic::set_hook(Box::new(|panic| {
        error!("Unhandled panic: {}", panic);
    }));

    info!("Starting HLS relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Default referer {} ({:?} fallback), public URL {}",
        config.default_referer,
        config.referer_fallback,
        config.public_url.as_deref().unwrap_or("derived per request")
    );

    if let Err(e) = server::start(config).await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
}

pub mod envelope;
pub mod handlers;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use axum::{Router, middleware, routing::get};
use state::AppState;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

/// Build the Axum router with all routes and middleware.
///
/// Layer order, outermost first: request tracing, CORS envelope, panic
/// boundary. A panicking handler therefore still answers with CORS headers.
pub fn build_router(config: Config) -> Result<Router, reqwest::Error> {
    let state = AppState::new(config)?;

    let app = Router::new()
        .route("/", get(handlers::legacy::serve_root))
        .route("/health", get(handlers::health::health_check))
        .route("/m3u8-proxy", get(handlers::playlist::serve_playlist))
        .route("/ts-proxy", get(handlers::segment::serve_segment))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(envelope::panic_response))
        .layer(middleware::from_fn(envelope::cors_envelope))
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();

    let app = build_router(config)?;

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Relay listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Relay stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

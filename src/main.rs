use crash_search::{
    api::{build_router, AppState},
    config::{Config, ObservabilityConfig},
    search::{HttpBackend, SearchService},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config.observability);

    tracing::info!("Starting Crash Search v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = %config.search.backend_url,
        index_pattern = %config.search.index_pattern,
        "Search backend configured"
    );

    let backend = HttpBackend::new(&config.search.backend_url, config.search.request_timeout())?;
    let search = Arc::new(SearchService::new(Arc::new(backend), config.search.clone())?);

    let app_state = AppState::new(search)
        .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs));
    let app = build_router(app_state);

    // Start HTTP server
    let http_addr = config.server.bind_address();
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Search API: http://{}/api/search", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "crash_search={},tower_http={}",
            observability.log_level, observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

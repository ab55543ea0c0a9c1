use match_server::config::ServerConfig;
use match_server::registry::MatchRegistry;
use match_server::ws::AppState;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid server configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }

    let registry = MatchRegistry::new(&config);
    registry.register_module(&config.module, config.match_config.clone());

    let app = match_server::http::router(AppState {
        registry: registry.clone(),
    })
    .layer(CorsLayer::permissive());

    tracing::info!("Starting match server on {}", config.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = shutdown_signal(registry, config.shutdown_grace_secs);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "server error");
    }
}

/// Wait for ctrl-c, then drain every match so sockets close on their own.
async fn shutdown_signal(registry: MatchRegistry, grace_seconds: u32) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    registry.terminate_all(grace_seconds).await;
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayfarer::api::{error, rate_limit};
use wayfarer::config::Config;
use wayfarer::payments::HttpCheckoutProvider;
use wayfarer::AppState;

#[derive(Parser, Debug)]
#[command(name = "wayfarer")]
#[command(author, version, about = "A tour booking REST API", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wayfarer.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Wayfarer v{}", env!("CARGO_PKG_VERSION"));

    // Error detail in responses is suppressed in production
    error::set_production_mode(config.environment.is_production());

    std::fs::create_dir_all(&config.server.data_dir)?;
    std::fs::create_dir_all(config.server.public_dir.join("img/tours"))?;
    std::fs::create_dir_all(config.server.public_dir.join("img/users"))?;

    let db = wayfarer::db::init(&config.server.data_dir).await?;

    let payments = Arc::new(HttpCheckoutProvider::new(&config.payments));
    let state = Arc::new(AppState::new(config.clone(), db, payments));

    rate_limit::spawn_cleanup_task(
        state.rate_limiter.clone(),
        config.rate_limit.cleanup_interval,
    );

    let api_router = wayfarer::api::create_router(state.clone());

    // Uploaded images and other static assets
    let app = axum::Router::new()
        .merge(api_router)
        .nest_service("/img", ServeDir::new(config.server.public_dir.join("img")));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

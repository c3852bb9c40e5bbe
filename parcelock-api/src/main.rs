//! parcelock-api - Smart locker service
//!
//! Bridges the locker's RFID reader and compartment servo to HTTP, and checks
//! delivered packages against their product description with a remote
//! vision-language model.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parcelock_api::hardware::{servo_driver_from_config, tag_driver_from_config};
use parcelock_api::{build_router, AppState};
use parcelock_common::config::load_config;
use parcelock_common::db::init_database;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for parcelock-api
#[derive(Parser, Debug)]
#[command(name = "parcelock-api")]
#[command(about = "Smart locker device and package verification service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "PARCELOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long, env = "PARCELOCK_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "PARCELOCK_PORT")]
    port: Option<u16>,

    /// SQLite record store (overrides config)
    #[arg(short, long, env = "PARCELOCK_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins; otherwise start at info and switch to the configured level
    let rust_log_set = std::env::var("RUST_LOG").is_ok();
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting parcelock-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    if !rust_log_set {
        filter_handle
            .reload(EnvFilter::new(format!(
                "{},tower_http=debug",
                config.logging.level
            )))
            .context("Failed to apply configured log level")?;
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to open record store")?;
    info!("✓ Record store ready");

    let tag_driver = tag_driver_from_config(&config.reader)?;
    let servo_driver = servo_driver_from_config(&config.servo)?;

    let state = AppState::new(pool, &config, tag_driver, servo_driver)
        .context("Failed to initialize services")?;
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("parcelock-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

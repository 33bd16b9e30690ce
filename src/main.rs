//! Fragments Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (in-memory backend, port 8080)
//! fragments
//!
//! # Start with custom config
//! fragments --config /path/to/config.toml
//!
//! # Durable storage on a custom port
//! fragments --backend sled --storage-dir /data/fragments --http-port 8091
//! ```

use clap::Parser;
use fragments::{open_stores, Backend, Config, FragmentStore, HttpServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fragments")]
#[command(about = "Multi-tenant fragment storage service")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "FRAGMENTS_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "FRAGMENTS_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Storage backend (memory or sled)
    #[arg(long, env = "FRAGMENTS_BACKEND")]
    backend: Option<Backend>,

    /// HTTP API port
    #[arg(long, env = "PORT")]
    http_port: Option<u16>,

    /// Public base URL used in Location headers
    #[arg(long, env = "API_URL")]
    api_url: Option<String>,

    /// Log filter directive, e.g. "fragments=debug"
    #[arg(long, env = "LOG_LEVEL", default_value = "fragments=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .init();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(api_url) = args.api_url {
        config.api_url = Some(api_url);
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        backend = %config.backend,
        http_port = config.http_port,
        "Starting fragments"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    if config.users.is_empty() {
        warn!("No users configured; every /v1 request will be rejected");
    }

    let store = FragmentStore::from_pair(open_stores(&config)?);
    let http_server = Arc::new(HttpServer::from_config(store.clone(), &config)?);

    info!("HTTP API available at http://{}", http_server.bind_addr());
    info!("Endpoints:");
    info!("  GET    /                         - Health check");
    info!("  GET    /v1/fragments             - List fragments");
    info!("  POST   /v1/fragments             - Create a fragment");
    info!("  GET    /v1/fragments/{{id}}        - Fragment data");
    info!("  GET    /v1/fragments/{{id}}.{{ext}}  - Converted fragment data");
    info!("  GET    /v1/fragments/{{id}}/info   - Fragment metadata");
    info!("  PUT    /v1/fragments/{{id}}        - Replace fragment data");
    info!("  DELETE /v1/fragments/{{id}}        - Delete a fragment");
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    // Run HTTP server with graceful shutdown
    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    if let Err(e) = store.flush().await {
        error!(error = %e, "Failed to flush storage");
    }

    Ok(())
}

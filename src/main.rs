//! OCCI Bridge
//!
//! Serves one backend family behind the platform-neutral REST surface.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use occi_bridge::backend::BackendFactory;
use occi_bridge::occi::Model;
use occi_bridge::store::MemoryStore;
use occi_bridge::{server, BridgeConfig, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OCCI bridge for heterogeneous cloud platform backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address of the REST surface
    #[arg(long, env = "BRIDGE_ADDR", default_value = "0.0.0.0:9390")]
    addr: String,

    /// Path to the bridge configuration file (JSON)
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend family to serve; overrides the configured one
    #[arg(long, env = "BRIDGE_BACKEND")]
    backend: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting OCCI bridge");
    info!("  Version: {}", occi_bridge::VERSION);
    info!("  Address: {}", args.addr);

    let config = BridgeConfig::load(args.config.as_deref())?;
    let backend = args.backend.clone().unwrap_or_else(|| config.backend.clone());
    info!("  Backend: {}", backend);

    let store = MemoryStore::shared();
    let (proxy, extender) = BackendFactory::create(&backend, &config, store).await?;

    let mut model = Model::infrastructure();
    extender.extend_model(&mut model).await?;
    info!(mixins = model.mixins().count(), "capability model ready");

    let app = server::router(Arc::new(proxy), Arc::new(model));

    let addr: SocketAddr = args
        .addr
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("REST surface listening on {}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)))?;

    info!("Bridge shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("tower=warn".parse().expect("static directive"))
        .add_directive("axum=info".parse().expect("static directive"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

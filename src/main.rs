//! WebSocket JSON-RPC server.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────────┐
//!                   │                    ws-rpc-server                          │
//!                   │                                                           │
//!   TCP connect     │  ┌──────────┐  acceptor pool   ┌──────────────────────┐   │
//!   ────────────────┼─▶│ listener │─────────────────▶│ pipeline per socket  │   │
//!                   │  └──────────┘                  │  http-codec          │   │
//!                   │                                │  size-guard          │   │
//!                   │          worker pool           │  websocket           │   │
//!   ◀───────────────┼────────────────────────────────│  rpc-handler ──▶ RpcHandler
//!   WebSocket reply │                                │  rpc-formatter       │   │
//!                   │                                │  idle-state          │   │
//!                   │                                └──────────────────────┘   │
//!                   │  config · lifecycle · observability                       │
//!                   └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ws_rpc_server::config::validation::validate_config;
use ws_rpc_server::config::{load_config, ConfigError, GatewayConfig};
use ws_rpc_server::lifecycle::wait_for_signal;
use ws_rpc_server::observability::{logging, metrics};
use ws_rpc_server::{MethodRegistry, WebSocketServer};

#[derive(Parser, Debug)]
#[command(name = "ws-rpc-server", version, about = "WebSocket JSON-RPC server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.bind_port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.bind_host = host;
    }
    if let Some(port) = args.port {
        config.server.bind_port = port;
    }
    if args.log_json {
        config.observability.log_json = true;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ws-rpc-server starting");
    tracing::info!(
        bind_host = %config.server.bind_host,
        bind_port = config.server.bind_port,
        idle_timeout_secs = config.server.idle_timeout_secs,
        max_message_bytes = config.server.max_message_bytes,
        max_connections = config.server.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let mut server = WebSocketServer::new(config.server, Arc::new(MethodRegistry::standard()));
    server.start()?;

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let signal = signals.block_on(wait_for_signal());
    tracing::info!(signal, "Shutdown signal received");

    if let Err(e) = server.stop() {
        tracing::warn!(error = %e, "Shutdown did not complete cleanly");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

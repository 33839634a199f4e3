//! Living Theory of Change request guard.
//!
//! ```text
//!  client ──▶ bypass check ──▶ CSRF ──▶ rate limit ──▶ application
//!                                │          │
//!                               403        429
//!  client ◀── security + CORS headers ◀────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ltoc_guard::config::{apply_env, load_config, watcher::ConfigWatcher, CliOverrides, GuardConfig};
use ltoc_guard::lifecycle::{signals, Shutdown};
use ltoc_guard::observability::{logging, metrics};
use ltoc_guard::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "ltoc-guard")]
#[command(about = "CSRF and rate-limit guard in front of the Living Theory of Change app", long_about = None)]
struct Args {
    /// TOML configuration file; watched for changes when given.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("ltoc-guard v{} starting", env!("CARGO_PKG_VERSION"));

    let overrides = CliOverrides {
        bind_address: args.bind,
    };
    apply_env(&mut config);
    overrides.apply(&mut config);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = ?config.upstream.address,
        window_ms = config.rate_limit.window_ms,
        max_requests = config.rate_limit.max_requests,
        production = config.security.production,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, overrides);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                    (None, updates)
                }
            }
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config);

    let serve = tokio::spawn(server.run(listener, config_updates, server_shutdown));
    signals::trigger_on_signal(&shutdown).await;
    serve.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, then the gateway core
//! - Start the config watcher and signal handler
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener starts last (traffic only when ready)

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::{loader::load_config, watcher::ConfigWatcher};
use crate::error::GatewayError;
use crate::http::HttpServer;
use crate::lifecycle::{signals::spawn_signal_handler, Shutdown};
use crate::observability::logging;

/// What the binary was asked to do.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// Reload routes when the config file changes.
    pub watch: bool,
}

/// Start the gateway and block until it has shut down.
pub async fn start(options: StartupOptions) -> Result<(), GatewayError> {
    let config = load_config(&options.config_path)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?options.config_path,
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        upstreams = config.upstreams.len(),
        "Configuration loaded"
    );

    let server = HttpServer::new(config.clone())?;

    // The watcher must stay alive for as long as the server runs.
    let (config_updates, _watcher) = if options.watch {
        let (watcher, updates) = ConfigWatcher::new(&options.config_path);
        (updates, Some(watcher.run()?))
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (updates, None)
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

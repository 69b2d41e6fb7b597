//! API Gateway
//!
//! An HTTP API gateway built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     API GATEWAY                      │
//!                        │                                                      │
//!   Client Request       │  ┌─────────┐   ┌─────────┐   ┌───────────┐           │
//!   ─────────────────────┼─▶│  http   │──▶│ routing │──▶│ admission │           │
//!                        │  │ server  │   │ matcher │   │  (lease)  │           │
//!                        │  └─────────┘   └─────────┘   └─────┬─────┘           │
//!                        │                                    ▼                 │
//!                        │                             ┌─────────────┐          │
//!                        │                             │  dispatch   │          │
//!                        │                             │ breaker, lb │          │
//!                        │                             │  retries    │          │
//!                        │                             └──────┬──────┘          │
//!                        │                                    ▼                 │
//!   Client Response      │  ┌──────────────────┐       ┌─────────────┐          │
//!   ◀────────────────────┼──│ response pipeline│◀──────│   client    │◀─────────┼─── Upstream
//!                        │  └──────────────────┘       └─────────────┘          │
//!                        │                                                      │
//!                        │  config · health · observability · admin · lifecycle │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::lifecycle::startup::{start, StartupOptions};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "HTTP API gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Reload routes when the configuration file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    start(StartupOptions {
        config_path: args.config,
        watch: args.watch,
    })
    .await?;
    Ok(())
}

//! request-shield: adaptive request-security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    REQUEST SHIELD                    │
//!                     │                                                      │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐   │
//!   ──────────────────┼─▶│  http   │──▶│ routing  │──▶│ security         │   │
//!                     │  │ server  │   │ profiles │   │ pipeline         │   │
//!                     │  └─────────┘   └──────────┘   └────────┬─────────┘   │
//!                     │                                        │ allow       │
//!                     │                                        ▼             │
//!   Client Response   │  ┌──────────────────┐          ┌──────────────┐      │
//!   ◀─────────────────┼──│ CORS + security  │◀─────────│ proxy client │◀─────┼── Upstream API
//!                     │  │ headers          │          └──────────────┘      │
//!                     │  └──────────────────┘                                │
//!                     │                                                      │
//!                     │  ┌────────────────────────────────────────────────┐  │
//!                     │  │ config (hot reload) · observability · admin API│  │
//!                     │  │ lifecycle (signals, graceful shutdown)         │  │
//!                     │  └────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use request_shield::lifecycle::startup;
use request_shield::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "request-shield", version)]
#[command(about = "Adaptive request-security gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Without one, defaults plus
    /// environment overrides are used and hot reload is disabled.
    #[arg(short, long, env = "SHIELD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = startup::load(args.config.as_deref())?;
    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        environment = %config.security.environment,
        "request-shield starting"
    );

    startup::run(config, args.config).await?;
    Ok(())
}

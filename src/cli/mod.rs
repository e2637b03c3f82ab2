//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

mod gateway;
mod onboard;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "picoclaw")]
#[command(about = "Personal/family-scale agent gateway", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the multi-channel gateway
    Gateway {
        /// Path to config.json (defaults to <workspace>/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Initialize workspace and configuration
    Onboard {
        /// Workspace directory (default ~/.picoclaw)
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Show version information
    Version,
}

/// Entry point for the CLI — called from main().
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (JSON format when RUST_LOG_FORMAT=json).
    let default_filter = if cli.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let use_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Some(Commands::Gateway { config }) => {
            gateway::cmd_gateway(config).await?;
        }
        Some(Commands::Onboard { workspace }) => {
            onboard::cmd_onboard(workspace).await?;
        }
        Some(Commands::Version) | None => {
            cmd_version();
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("picoclaw {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Personal/family-scale agent gateway");
}

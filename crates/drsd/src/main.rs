//! drsd — the DRS daemon.
//!
//! Single binary that assembles the scheduler:
//! - File-backed snapshot, rule, and settings sources
//! - One control loop per configured cluster
//! - Dry-run migration backend
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! drsd init --config /etc/drs/drsd.toml --data-dir /var/lib/drs --cluster prod-east
//! drsd run --config /etc/drs/drsd.toml --port 8450
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drsd", about = "Distributed resource scheduler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loops and the API server.
    Run {
        /// Path to drsd.toml.
        #[arg(long, default_value = "drsd.toml")]
        config: PathBuf,

        /// Port to listen on; overrides the config file.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a starter drsd.toml and per-cluster input directories.
    Init {
        /// Where to write drsd.toml.
        #[arg(long, default_value = "drsd.toml")]
        config: PathBuf,

        /// Directory holding per-cluster inputs.
        #[arg(long, default_value = "/var/lib/drs")]
        data_dir: PathBuf,

        /// Cluster id to manage; repeat for several clusters.
        #[arg(long = "cluster", required = true)]
        clusters: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,drsd=debug,drs=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run { config, port } => daemon::run(&config, port).await,
        Command::Init {
            config,
            data_dir,
            clusters,
        } => {
            daemon::init(&config, &data_dir, &clusters)?;
            info!(path = ?config, clusters = clusters.len(), "configuration written");
            Ok(())
        }
    }
}

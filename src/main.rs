use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use foundry::builder::server::{ServerConfig, start_server};
use foundry::config::Config;

#[derive(Parser)]
#[command(name = "foundry")]
#[command(version, about = "Build orchestration server")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestration server
    Serve {
        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Root directory for per-project workspaces
        #[arg(long)]
        workspace_root: Option<PathBuf>,

        /// Bind on all interfaces and allow CORS (development)
        #[arg(long)]
        dev: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "foundry=debug"
    } else {
        "foundry=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            db,
            workspace_root,
            dev,
        } => {
            let mut config = Config::load(&std::env::current_dir()?)?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db) = db {
                config.db_path = db;
            }
            if let Some(root) = workspace_root {
                config.workspace_root = root;
            }
            start_server(ServerConfig {
                config,
                dev_mode: dev,
            })
            .await
        }
    }
}

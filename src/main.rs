use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use folio::config::FolioConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "Portfolio backend with an audited factory reset")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to folio.toml (defaults to ./folio.toml when present)
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the database and apply migrations, then exit
    InitDb,
    /// Inspect the factory-reset audit ledger
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum AuditCommands {
    /// Most recent reset jobs, newest first
    History {
        #[arg(short, long, default_value = "20", allow_negative_numbers = true)]
        limit: i64,
    },
    /// One reset job as JSON
    Show { job_id: String },
    /// Jobs that are still STARTED or IN_PROGRESS
    Active,
    /// Replay the ledger hash chain and report tampering
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FolioConfig::resolve(cli.config.as_deref())?;
    let _log_guard = folio::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            cmd::cmd_serve(config).await?;
        }
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Audit { command } => cmd::cmd_audit(&config, command)?,
    }

    Ok(())
}

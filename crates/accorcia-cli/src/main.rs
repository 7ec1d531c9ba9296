//! Accorcia CLI
//!
//! Terminal client for the shortlink backend's live visit updates.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use accorcia_cli::auth_cmd::{self, AuthAction};
use accorcia_cli::credentials::Credentials;
use accorcia_cli::get_cmd;
use accorcia_cli::watch_cmd::{self, WatchEnd};
use accorcia_core::config::load_config;
use accorcia_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "accorcia")]
#[command(version, about = "Watch shortlink visits live", long_about = None)]
struct Cli {
    /// Explicit config file, layered over the global one
    #[arg(long, global = true, env = "ACCORCIA_CONFIG")]
    config: Option<PathBuf>,

    /// REST API root (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// STOMP WebSocket endpoint (overrides config)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in, log out or show the stored session
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Print live visit updates for the given short codes
    Watch {
        #[arg(required = true, num_args = 1..)]
        codes: Vec<String>,
    },
    /// Authorised GET against the API, e.g. `urls/abc/stats`
    Get { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }
    if let Some(url) = cli.ws_url {
        config.realtime.ws_url = url;
    }

    let filter = format!(
        "accorcia_cli={0},accorcia_live={0},accorcia_core={0}",
        config.log.level
    );
    init_tracing(&filter, cli.log_json || config.log.json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting accorcia CLI");

    let credentials = Credentials::default_path()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;

    match cli.command {
        Commands::Auth { action } => auth_cmd::run(action, &config, &credentials).await,
        Commands::Watch { codes } => {
            let stored = Credentials::load(&credentials)
                .ok_or_else(|| anyhow::anyhow!("Not logged in. Run `accorcia auth login` first"))?;
            let session = stored.restore(&config.session);
            match watch_cmd::run(&codes, &config, &session).await? {
                WatchEnd::SessionExpired => {
                    anyhow::bail!("Session expired. Run `accorcia auth login` to continue")
                }
                WatchEnd::Interrupted | WatchEnd::StreamsClosed => Ok(()),
            }
        }
        Commands::Get { path } => {
            let stored = Credentials::load(&credentials)
                .ok_or_else(|| anyhow::anyhow!("Not logged in. Run `accorcia auth login` first"))?;
            let session = stored.restore(&config.session);
            get_cmd::run(&path, &config, session, &credentials).await
        }
    }
}

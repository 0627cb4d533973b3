//! WorldBest command-line client.
//!
//! Signs in, calls the REST API with automatic token refresh, and follows
//! realtime events over the WebSocket connection.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use worldbest_protocol::constants::{API_URL_ENV, WS_URL_ENV};

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "worldbest", about = "WorldBest API and realtime client", version)]
pub(crate) struct Cli {
    /// REST API base URL (overrides the config file)
    #[arg(long, env = API_URL_ENV, global = true)]
    api_url: Option<String>,

    /// Realtime WebSocket URL (overrides the config file)
    #[arg(long, env = WS_URL_ENV, global = true)]
    ws_url: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Sign in and store the credentials
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "WORLDBEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and forget the stored credentials
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Perform an authenticated API request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
        /// Extra query parameters as key=value
        #[arg(long = "query", short = 'q')]
        query: Vec<String>,
    },
    /// Upload a file, reporting progress on stderr
    Upload {
        /// Endpoint path relative to the API base URL
        path: String,
        file: PathBuf,
    },
    /// Stay connected and print realtime events as JSON lines
    Listen {
        /// Event types to print; all known collaboration events when empty
        #[arg(long = "event", short = 'e')]
        events: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_path()?,
    };
    let mut config = ClientConfig::load(&config_path)?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(url) = cli.ws_url {
        config.ws_url = url;
    }

    match cli.command {
        Command::Login { email, password } => commands::login(&config, &email, password).await,
        Command::Logout => commands::logout(&config).await,
        Command::Whoami => commands::whoami(&config).await,
        Command::Request {
            method,
            path,
            data,
            query,
        } => commands::request(&config, &method, &path, data.as_deref(), &query).await,
        Command::Upload { path, file } => commands::upload(&config, &path, &file).await,
        Command::Listen { events } => commands::listen(&config, events).await,
        Command::Config => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

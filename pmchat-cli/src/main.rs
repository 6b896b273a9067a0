//! Prosjektmarkedet chat CLI.

mod commands;
mod config;
mod handlers;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::chat;
use tracing_subscriber::EnvFilter;

/// Prosjektmarkedet chat CLI
#[derive(Parser)]
#[command(name = "pmchat")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "plain")]
    format: output::OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// REST base URL
    #[arg(long, global = true, env = config::BASE_URL_ENV)]
    base_url: Option<String>,

    /// Realtime server URL
    #[arg(long, global = true, env = config::SOCKET_URL_ENV)]
    socket_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage authentication
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Chat operations
    #[command(alias = "c")]
    Chat {
        #[command(subcommand)]
        action: chat::ChatAction,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum AuthAction {
    /// Login with token and user id
    Login {
        /// Bearer token
        #[arg(short, long)]
        token: String,
        /// User ID
        #[arg(short, long)]
        user_id: String,
    },
    /// Logout
    Logout,
    /// Show current auth status
    Status,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    config::set_overrides(config::Overrides {
        base_url: cli.base_url.clone(),
        socket_url: cli.socket_url.clone(),
    });

    match cli.command {
        Commands::Auth { action } => handle_auth(action).await,
        Commands::Chat { action } => chat::handle(action, cli.format, cli.verbose).await,
        Commands::Config => {
            let cfg = config::effective_config()?;
            println!("Config file: {}", config::config_path()?.display());
            println!(
                "Base URL: {}",
                cfg.base_url.as_deref().unwrap_or(pmchat::client::DEFAULT_BASE_URL)
            );
            match &cfg.socket_url {
                Some(url) => println!("Socket URL: {url}"),
                None => println!("Socket URL: derived from base URL"),
            }
            println!("Authenticated: {}", cfg.auth.is_some());
            if let Some(auth) = &cfg.auth {
                println!("User ID: {}", auth.user_id);
            }
            Ok(())
        }
    }
}

async fn handle_auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login { token, user_id } => {
            let mut cfg = config::load_config()?;
            cfg.auth = Some(config::AuthConfig {
                token,
                user_id: user_id.clone(),
            });
            config::save_config(&cfg)?;
            println!("Logged in as {user_id}");
            Ok(())
        }
        AuthAction::Logout => {
            let mut cfg = config::load_config()?;
            cfg.auth = None;
            config::save_config(&cfg)?;
            println!("Logged out");
            Ok(())
        }
        AuthAction::Status => {
            let client = config::build_client()?;
            match client.auth_info() {
                Some(auth) if client.is_authenticated() => {
                    println!("Logged in as {}", auth.user_id)
                }
                _ => println!("Not logged in"),
            }
            Ok(())
        }
    }
}

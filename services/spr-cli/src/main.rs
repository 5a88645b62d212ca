//! `spr` command line client
//!
//! Interactive entry points for the platform's OAuth flows plus a few
//! utilities over the credential store:
//! 1. `password-auth` / `oauth` obtain tokens and store them
//! 2. `list` / `logout` inspect and prune the store
//! 3. `call` reuses stored tokens for one authenticated API call

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::Config;

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let source = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&source)
        .and_then(|c| c.with_overrides(cli.base_url.clone(), cli.store.clone()))
        .context("loading configuration")?;
    let settings = config.settings();

    info!(
        base_url = %settings.base_url,
        timeout_secs = settings.timeout.as_secs(),
        store = ?settings.credentials_path,
        "configuration loaded"
    );

    match cli.command {
        Commands::PasswordAuth(args) => commands::password_auth(&settings, args).await,
        Commands::Oauth(args) => commands::oauth(&settings, args).await,
        Commands::List => commands::list(&settings).await,
        Commands::Logout(args) => commands::logout(&settings, args).await,
        Commands::Call(args) => commands::call(&settings, args).await,
    }
}

//! Command line definitions
//!
//! Global flags override the config file and `SPR_*` variables. Missing
//! application credentials are prompted for by the commands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spr")]
#[command(about = "Authenticate against the analytics platform API and store access tokens")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (overrides SPR_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to where access tokens are stored (overrides config and SPR_CREDENTIALS_PATH)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// API base URL (overrides config and SPR_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in with your platform email and password
    PasswordAuth(PasswordAuthArgs),
    /// Log in through the browser authorization-code flow
    Oauth(OauthArgs),
    /// List stored credentials (no secrets are printed)
    List,
    /// Remove a stored credential
    Logout(SelectArgs),
    /// Make one authenticated API call and print its data
    Call(CallArgs),
}

/// Application credentials shared by both login flows. Missing values are
/// prompted for.
#[derive(Args)]
pub struct AppArgs {
    /// Platform environment
    #[arg(short, long, default_value = "prod")]
    pub environment: String,

    /// Your application client id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Your application client secret
    #[arg(long, env = "SPR_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Your application redirect link
    #[arg(long)]
    pub redirect_url: Option<String>,
}

#[derive(Args)]
pub struct PasswordAuthArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Your platform email address
    #[arg(short, long)]
    pub username: Option<String>,

    /// Your platform password
    #[arg(short, long, env = "SPR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct OauthArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Authorization code returned to the redirect URL; prompted for after
    /// printing the authorization link when omitted
    #[arg(short = 'c', long)]
    pub authorization_code: Option<String>,
}

/// Which stored credential to use. Either may be omitted when it is
/// unambiguous.
#[derive(Args)]
pub struct SelectArgs {
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Application client id the credential is stored under
    #[arg(short, long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct CallArgs {
    /// HTTP method
    pub method: String,

    /// Endpoint under api/v2/, e.g. `reports/query`
    pub endpoint: String,

    #[command(flatten)]
    pub select: SelectArgs,

    /// JSON request body
    #[arg(long)]
    pub body: Option<String>,

    /// Query parameter as name=value (repeatable)
    #[arg(short, long = "query", value_name = "NAME=VALUE")]
    pub query: Vec<String>,
}

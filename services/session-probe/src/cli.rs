use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "session-probe")]
#[command(about = "Drive the calendar backend session from the command line")]
pub struct Cli {
    /// Config file (falls back to CONFIG_PATH, then session-probe.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,
    /// Print a Prometheus snapshot of client metrics after the command
    #[arg(long, global = true)]
    pub metrics: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Store session credentials issued by the backend")]
    SignIn(SignInArgs),
    #[command(about = "Send an authenticated request, retrying once after a refresh")]
    Request(RequestArgs),
    #[command(about = "Refresh the stored access token")]
    Refresh,
    #[command(about = "Log out on the backend and remove local credentials")]
    SignOut,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignIn(_) => "sign-in",
            Self::Request(_) => "request",
            Self::Refresh => "refresh",
            Self::SignOut => "sign-out",
        }
    }
}

#[derive(Args)]
pub struct SignInArgs {
    #[arg(long, env = "SESSION_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,
    #[arg(long, env = "SESSION_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: String,
}

#[derive(Args)]
pub struct RequestArgs {
    /// GET, POST, PUT, PATCH or DELETE
    pub method: String,
    /// Path joined onto backend.base_url, or an absolute URL
    pub path: String,
    /// JSON request body
    #[arg(long)]
    pub body: Option<String>,
    /// Overrides backend.timeout_secs for this request
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

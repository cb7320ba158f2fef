//! LeadPulse CLI
//!
//! Command-line interface for following LeadPulse analysis runs.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leadpulse")]
#[command(about = "LeadPulse analysis progress CLI", long_about = None)]
struct Cli {
    /// LeadPulse API URL
    #[arg(long, env = "LEADPULSE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// API token for authenticated endpoints
    #[arg(long, env = "LEADPULSE_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = Config {
        api_url: cli.api_url,
        token: cli.token,
    };

    handle_command(cli.command, &config).await
}

/// Wire library logs to stderr, honoring `RUST_LOG`
///
/// Defaults to the library's info level so connection transitions show up
/// without burying the progress output, which goes to stdout.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leadpulse=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

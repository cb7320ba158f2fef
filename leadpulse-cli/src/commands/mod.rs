//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod status;
mod watch;

use anyhow::Result;
use clap::Subcommand;
use leadpulse_client::TransportKind;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream live progress for analysis runs
    Watch {
        /// Run ID to follow
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        run_id: Option<String>,

        /// Follow every active run instead of a single one (Ctrl+C to stop)
        #[arg(long)]
        all: bool,

        /// Transport tier to start on (websocket, sse or polling)
        #[arg(long)]
        transport: Option<TransportKind>,

        /// Stay on the chosen transport instead of falling back
        #[arg(long)]
        no_fallback: bool,
    },
    /// Show the current status of analysis runs
    Status {
        /// Run ID to inspect
        #[arg(required_unless_present = "active", conflicts_with = "active")]
        run_id: Option<String>,

        /// List every currently active run
        #[arg(long)]
        active: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Watch {
            run_id,
            all: _,
            transport,
            no_fallback,
        } => watch::handle_watch_command(run_id, transport, no_fallback, config).await,
        Commands::Status { run_id, active: _ } => {
            status::handle_status_command(run_id, config).await
        }
    }
}

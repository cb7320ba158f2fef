//! Watch command handlers
//!
//! Follows analysis progress live over the streaming client, printing one
//! line per update until the run (or the channel) reaches a terminal state.

use std::collections::HashMap;

use anyhow::{Result, bail};
use colored::*;
use leadpulse_client::{ChannelState, ProgressClient, StaticToken, StreamConfig, TransportKind};
use leadpulse_core::domain::job::{JobProgress, JobStatus};

use crate::config::Config;

/// Handle the watch command
///
/// Subscribes to a single run, or to every active run when no ID is given,
/// and renders updates until the stream ends.
///
/// # Arguments
/// * `run_id` - The run to follow, or `None` for all active runs
/// * `transport` - Transport tier override, if any
/// * `no_fallback` - Disable the transport fallback ladder
/// * `config` - The CLI configuration
pub async fn handle_watch_command(
    run_id: Option<String>,
    transport: Option<TransportKind>,
    no_fallback: bool,
    config: &Config,
) -> Result<()> {
    let token = config.require_token()?;

    let mut stream_config = StreamConfig::new(&config.api_url);
    if let Some(kind) = transport {
        stream_config.transport = kind;
    }
    if no_fallback {
        stream_config.fallback_enabled = false;
    }

    let client = ProgressClient::new(stream_config, StaticToken::new(token))?;

    let result = match run_id {
        Some(id) => watch_run(&client, &id).await,
        None => watch_all(&client).await,
    };

    client.shutdown().await;
    result
}

/// Follow a single run to its terminal state
async fn watch_run(client: &ProgressClient, run_id: &str) -> Result<()> {
    let mut subscription = client.subscribe(run_id);

    println!("{}", format!("Watching analysis run {}:", run_id).bold());
    println!();

    let mut last_line: Option<String> = None;
    let mut last_state = subscription.state();

    loop {
        if let Some(progress) = subscription.progress() {
            let line = progress_line(&progress);
            if last_line.as_deref() != Some(line.as_str()) {
                println!("{}", line);
                last_line = Some(line);
            }
        }

        let state = subscription.state();
        if state != last_state {
            print_state_change(&state);
            last_state = state.clone();
        }
        if state.is_terminal() {
            break;
        }

        subscription.changed().await;
    }

    let record = subscription.wait_terminal().await?;

    if record.status == JobStatus::Complete {
        println!();
        println!("{} Analysis complete.", "✓".green());
        return Ok(());
    }

    let detail = record
        .error
        .clone()
        .unwrap_or_else(|| format!("run ended as {}", record.status));
    bail!("analysis run {} did not complete: {}", run_id, detail)
}

/// Follow every active run until the channel itself ends
async fn watch_all(client: &ProgressClient) -> Result<()> {
    let mut subscription = client.subscribe_all();

    println!("{}", "Watching all active analyses (Ctrl+C to stop):".bold());
    println!();

    let mut printed: HashMap<String, String> = HashMap::new();
    let mut last_state = subscription.state();

    loop {
        let runs = subscription.snapshot();
        for progress in &runs {
            let line = progress_line(progress);
            if printed.get(&progress.run_id) != Some(&line) {
                println!("{}", line);
                printed.insert(progress.run_id.clone(), line);
            }
        }

        if !runs.is_empty() && runs.iter().all(|run| run.is_terminal()) {
            println!();
            println!(
                "{} All observed analyses reached a terminal state.",
                "✓".green()
            );
            return Ok(());
        }

        let state = subscription.state();
        if state != last_state {
            print_state_change(&state);
            last_state = state.clone();
        }
        if state.is_terminal() {
            break;
        }

        subscription.changed().await;
    }

    match subscription.state() {
        ChannelState::Failed { failure } => bail!("progress channel failed: {}", failure),
        _ => Ok(()),
    }
}

/// Render one progress update as a log-style line
fn progress_line(progress: &JobProgress) -> String {
    let mut line = format!(
        "{} {} {}  {} {}%",
        progress.updated_at.format("%H:%M:%S").to_string().dimmed(),
        "▸".cyan(),
        progress.run_id,
        colorize_status(progress.status),
        progress.progress,
    );

    if let Some(step) = progress.step {
        let marker = format!(" ({}/{})", step.current, step.total);
        line.push_str(&marker.dimmed().to_string());
    }

    if let Some(label) = &progress.current_step {
        line.push_str(&format!("  {}", label.dimmed()));
    }

    if progress.status == JobStatus::Failed {
        if let Some(error) = &progress.error {
            line.push_str(&format!("  {}", error.red()));
        }
    }

    line
}

/// Print a channel state transition worth telling the user about
fn print_state_change(state: &ChannelState) {
    match state {
        ChannelState::Connected { .. } => {
            println!("  {}", format!("● {}", state).dimmed());
        }
        ChannelState::Reconnecting { .. } | ChannelState::Degraded { .. } => {
            println!("  {}", format!("⚠ {}", state).yellow());
        }
        _ => {}
    }
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Analyzing => status_str.cyan(),
        JobStatus::Complete => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}

//! Status command handlers
//!
//! One-shot status checks against the REST API: a single run's snapshot or
//! the list of currently active analyses.

use anyhow::Result;
use colored::*;
use leadpulse_client::RestClient;
use leadpulse_core::domain::job::JobStatus;
use leadpulse_core::dto::rest::AnalysisSnapshot;

use crate::config::Config;

/// Handle the status command
///
/// Fetches and prints a single run's snapshot, or the active-runs list when
/// no ID is given.
///
/// # Arguments
/// * `run_id` - The run to inspect, or `None` for the active list
/// * `config` - The CLI configuration
pub async fn handle_status_command(run_id: Option<String>, config: &Config) -> Result<()> {
    let token = config.require_token()?;
    let client = RestClient::new(&config.api_url);

    match run_id {
        Some(id) => show_run(&client, &id, &token).await,
        None => list_active(&client, &token).await,
    }
}

/// Fetch and display a single run
async fn show_run(client: &RestClient, run_id: &str, token: &str) -> Result<()> {
    let snapshot = client.analysis_status(run_id, token).await?;

    print_run_details(&snapshot);

    Ok(())
}

/// List every currently active run
async fn list_active(client: &RestClient, token: &str) -> Result<()> {
    let runs = client.active_analyses(token).await?;

    if runs.is_empty() {
        println!("{}", "No active analyses.".yellow());
    } else {
        println!("{}", format!("Found {} active run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

/// Print a run summary
fn print_run_summary(run: &AnalysisSnapshot) {
    let status_colored = colorize_status(run.status);

    println!("  {} Run {}", "▸".cyan(), run.run_id.dimmed());
    println!("    Status:   {}", status_colored);
    if let Some(progress) = run.progress {
        println!("    Progress: {}%", progress);
    }
    if let Some(label) = &run.current_step {
        println!("    Stage:    {}", label.dimmed());
    }
    println!();
}

/// Print detailed run information
fn print_run_details(run: &AnalysisSnapshot) {
    let status_colored = colorize_status(run.status);

    println!("{}", "Analysis Run:".bold());
    println!("  ID:        {}", run.run_id.cyan());
    println!("  Status:    {}", status_colored);

    if let Some(progress) = run.progress {
        println!("  Progress:  {}%", progress);
    }

    if let Some(step) = run.step {
        println!("  Step:      {}/{}", step.current, step.total);
    }

    if let Some(label) = &run.current_step {
        println!("  Stage:     {}", label);
    }

    if let Some(lead) = &run.lead_id {
        println!("  Lead:      {}", lead.dimmed());
    }

    if let Some(error) = &run.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
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

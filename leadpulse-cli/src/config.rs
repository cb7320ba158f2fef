//! Configuration module
//!
//! Handles CLI configuration including the API URL and access token.

use anyhow::{Context, Result};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the LeadPulse API
    pub api_url: String,
    /// Bearer token for authenticated endpoints
    pub token: Option<String>,
}

impl Config {
    /// Return the token, or explain how to supply one
    pub fn require_token(&self) -> Result<String> {
        self.token
            .clone()
            .context("an API token is required: pass --token or set LEADPULSE_API_TOKEN")
    }
}

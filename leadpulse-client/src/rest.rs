//! REST client for the analyses API
//!
//! Covers the snapshot endpoints: a one-shot status check for a single run
//! and the list of currently active analyses. The polling transport is
//! built on top of these same calls.

use reqwest::Client;
use serde::de::DeserializeOwned;

use leadpulse_core::dto::rest::AnalysisSnapshot;

use crate::error::{Result, StreamError};

/// HTTP client for the LeadPulse analyses API
#[derive(Debug, Clone)]
pub struct RestClient {
    /// Base URL of the API (e.g., "https://api.leadpulse.io")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API (e.g., "https://api.leadpulse.io")
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new REST client with a custom HTTP client
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current snapshot of one analysis run
    ///
    /// # Arguments
    /// * `run_id` - The analysis run to look up
    /// * `token` - Bearer token for the authenticated user
    pub async fn analysis_status(&self, run_id: &str, token: &str) -> Result<AnalysisSnapshot> {
        let url = format!("{}/api/analyses/{}/status", self.base_url, run_id);
        let response = self.client.get(&url).bearer_auth(token).send().await?;

        self.handle_response(response).await
    }

    /// List every analysis currently active for the authenticated user
    pub async fn active_analyses(&self, token: &str) -> Result<Vec<AnalysisSnapshot>> {
        let url = format!("{}/api/analyses/active", self.base_url);
        let response = self.client.get(&url).bearer_auth(token).send().await?;

        self.handle_response(response).await
    }

    /// Handle an API response and deserialize JSON
    ///
    /// Checks the status code and returns an appropriate error if the
    /// request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StreamError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| StreamError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

//! LeadPulse Streaming Client
//!
//! Keeps a live, always-current view of LeadPulse analysis runs. The client
//! connects over WebSocket, falls back to server-sent events and finally to
//! REST polling, sends keep-alive pings under the backend's idle threshold,
//! reconnects with a linear backoff, and merges every frame into a shared
//! progress store. Consumers subscribe per run (or to all runs) and either
//! watch the store change or wait for a terminal status.
//!
//! # Example
//!
//! ```no_run
//! use leadpulse_client::{ProgressClient, StaticToken, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StreamConfig::new("https://api.leadpulse.io");
//!     let client = ProgressClient::new(config, StaticToken::new("token"))?;
//!
//!     let mut subscription = client.subscribe("run-42");
//!     while !subscription.state().is_terminal() {
//!         if let Some(record) = subscription.progress() {
//!             println!("{}: {}% ({})", record.run_id, record.progress, record.status);
//!         }
//!         subscription.changed().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
mod connection;
mod dispatch;
pub mod error;
mod heartbeat;
mod reconnect;
mod registry;
pub mod rest;
pub mod scope;
pub mod store;
mod transport;
pub mod visibility;

// Re-export the working surface
pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use config::{StreamConfig, TransportKind};
pub use connection::{ChannelState, StreamFailure};
pub use error::{Result, StreamError};
pub use registry::{ProgressClient, Subscription};
pub use rest::RestClient;
pub use scope::ScopeTarget;
pub use store::ProgressStore;
pub use visibility::{Visibility, VisibilityHandle};

// Domain types consumers handle directly
pub use leadpulse_core::domain::job::{JobProgress, JobStatus, StepProgress};

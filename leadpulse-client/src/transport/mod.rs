//! Transport tiers for the progress stream
//!
//! Three carriers deliver the same progress envelopes: WebSocket
//! (bidirectional, preferred), server-sent events (push over a streaming
//! HTTP response), and snapshot polling against the REST API (the floor).
//! Every tier hands the supervisor the same session shape, so one loop
//! drives them all.

mod poll;
mod sse;
mod ws;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use leadpulse_core::dto::rest::AnalysisSnapshot;

use crate::config::{StreamConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::scope::ScopeTarget;

/// Inbound event buffer per session.
const EVENT_BUFFER: usize = 256;

/// One event surfaced by a transport session
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Raw text frame (WebSocket and SSE tiers).
    Frame(String),
    /// Snapshot fetched by the polling tier.
    Snapshot(AnalysisSnapshot),
    /// The session ended. `code` carries the WebSocket close code when the
    /// server sent one; `None` means the link dropped or errored out.
    Closed { code: Option<u16>, reason: String },
}

/// Live session on one transport tier
///
/// Constructed by [`connect`]; the io task behind it runs until the link
/// ends or [`TransportSession::close`] asks it to stop.
pub(crate) struct TransportSession {
    pub(crate) kind: TransportKind,
    /// Inbound events; closes when the io task ends.
    pub(crate) events: mpsc::Receiver<TransportEvent>,
    /// Outbound text frames; `None` on receive-only tiers.
    pub(crate) outbound: Option<mpsc::Sender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TransportSession {
    /// Close gracefully: the io task sends a normal close where its tier
    /// has one, then winds down.
    pub(crate) async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // Give the io task a moment to flush the close frame.
        let _ = tokio::time::timeout(Duration::from_secs(1), self.task).await;
    }
}

/// Establish a session on the given tier.
///
/// Completion of this call is what "connected" means to the reconnect
/// policy: the WebSocket handshake finished, the SSE response started, or
/// the first polling snapshot landed.
pub(crate) async fn connect(
    kind: TransportKind,
    config: &StreamConfig,
    scope: &ScopeTarget,
    token: &str,
) -> Result<TransportSession> {
    match kind {
        TransportKind::WebSocket => ws::connect(config, scope, token).await,
        TransportKind::Sse => sse::connect(config, scope, token).await,
        TransportKind::Polling => poll::connect(config, scope, token).await,
    }
}

/// Streaming endpoint URL with the access token as a query parameter.
///
/// The streaming handshakes cannot carry custom headers, so the token
/// rides the URL instead of an Authorization header.
fn stream_url(
    base_url: &str,
    scope: &ScopeTarget,
    endpoint: &str,
    token: &str,
) -> Result<Url> {
    let path = match scope.run_id() {
        Some(run_id) => format!("/api/analyses/{run_id}/{endpoint}"),
        None => format!("/api/analyses/{endpoint}"),
    };
    let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&raw)
        .map_err(|e| StreamError::Config(format!("invalid endpoint URL {raw}: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

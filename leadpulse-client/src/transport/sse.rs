//! Server-sent events transport
//!
//! First fallback tier: a long-lived `text/event-stream` response whose
//! `data:` payloads carry the same JSON envelopes as the WebSocket. The
//! stream is receive-only, so there is no heartbeat; the server's comment
//! lines keep intermediaries from idling the connection out.

use reqwest::header;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::{StreamConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::scope::ScopeTarget;

use super::{TransportEvent, TransportSession, EVENT_BUFFER};

pub(super) async fn connect(
    config: &StreamConfig,
    scope: &ScopeTarget,
    token: &str,
) -> Result<TransportSession> {
    let url = super::stream_url(&config.base_url, scope, "stream", token)?;

    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;

    // The builder's connect timeout only caps the TCP handshake; the
    // response headers need their own bound. No whole-client timeout
    // here: it would cut the long-lived stream body off.
    let response = tokio::time::timeout(
        config.connect_timeout,
        client
            .get(url.as_str())
            .header(header::ACCEPT, "text/event-stream")
            .send(),
    )
    .await
    .map_err(|_| {
        StreamError::Connection(format!(
            "SSE handshake timed out after {:?}",
            config.connect_timeout
        ))
    })??;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(StreamError::api_error(status.as_u16(), error_text));
    }

    debug!("SSE stream connected (scope: {})", scope);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(io_loop(response, events_tx, shutdown_rx));

    Ok(TransportSession {
        kind: TransportKind::Sse,
        events: events_rx,
        outbound: None,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn io_loop(
    mut response: reqwest::Response,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut decoder = SseDecoder::new();

    let closed = loop {
        tokio::select! {
            chunk = response.chunk() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        for payload in decoder.push(&bytes) {
                            if events.send(TransportEvent::Frame(payload)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        // The server ended the response body. Whether that
                        // is fine or not depends on what was delivered; the
                        // supervisor decides.
                        break TransportEvent::Closed {
                            code: None,
                            reason: "event stream ended".to_string(),
                        };
                    }
                    Err(e) => {
                        break TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                }
            }
            _ = &mut shutdown => return,
        }
    };

    let _ = events.send(closed).await;
}

/// Incremental decoder for a `text/event-stream` body
///
/// Accumulates `data:` lines per the SSE framing rules and yields one
/// payload per blank-line-terminated event. Comment lines (leading `:`)
/// are keep-alives and are skipped; `event:`, `id:` and `retry:` fields
/// are irrelevant to this stream.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: String,
    data: Vec<String>,
}

impl SseDecoder {
    fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event payload completed by this chunk.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        payloads
    }
}

//! WebSocket transport
//!
//! Preferred tier: a bidirectional socket that carries progress frames in
//! and keep-alive pings out. Close codes from the server are surfaced
//! verbatim so the supervisor can tell deliberate shutdowns from drops.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::config::{StreamConfig, TransportKind};
use crate::error::{Result, StreamError};
use crate::scope::ScopeTarget;

use super::{TransportEvent, TransportSession, EVENT_BUFFER};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(super) async fn connect(
    config: &StreamConfig,
    scope: &ScopeTarget,
    token: &str,
) -> Result<TransportSession> {
    let url = endpoint(config, scope, token)?;

    let (stream, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                StreamError::Connection(format!(
                    "WebSocket handshake timed out after {:?}",
                    config.connect_timeout
                ))
            })?
            .map_err(map_handshake_error)?;

    debug!("WebSocket connected (scope: {})", scope);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(io_loop(stream, events_tx, outbound_rx, shutdown_rx));

    Ok(TransportSession {
        kind: TransportKind::WebSocket,
        events: events_rx,
        outbound: Some(outbound_tx),
        shutdown: Some(shutdown_tx),
        task,
    })
}

/// Build the WebSocket URL from the HTTP base URL.
fn endpoint(config: &StreamConfig, scope: &ScopeTarget, token: &str) -> Result<Url> {
    let base = config.base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(StreamError::Config(format!("invalid URL scheme: {base}")));
    };
    super::stream_url(&ws_base, scope, "ws", token)
}

fn map_handshake_error(e: tungstenite::Error) -> StreamError {
    match e {
        tungstenite::Error::Http(response) => StreamError::api_error(
            response.status().as_u16(),
            "WebSocket handshake rejected",
        ),
        other => StreamError::Connection(other.to_string()),
    }
}

async fn io_loop(
    stream: WsStream,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sink, mut reader) = stream.split();

    let closed = loop {
        tokio::select! {
            msg = reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Frame(text.to_string())).await.is_err() {
                            // Supervisor gone; nothing left to deliver to.
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        break Some(TransportEvent::Closed { code, reason });
                    }
                    None => {
                        break Some(TransportEvent::Closed {
                            code: None,
                            reason: "connection dropped".to_string(),
                        });
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break Some(TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                    }
                    Some(Ok(_)) => {} // Binary/Ping/Pong -- ignore
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            break Some(TransportEvent::Closed {
                                code: None,
                                reason: e.to_string(),
                            });
                        }
                    }
                    None => {
                        // Every sender dropped; treat as a local shutdown.
                        let _ = sink.send(Message::Close(Some(normal_close()))).await;
                        break None;
                    }
                }
            }
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(Some(normal_close()))).await;
                break None;
            }
        }
    };

    if let Some(event) = closed {
        let _ = events.send(event).await;
    }
}

fn normal_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "client closed".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_swaps_scheme() {
        let config = StreamConfig::new("https://api.leadpulse.io");
        let url = endpoint(&config, &ScopeTarget::job("run-1"), "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.leadpulse.io/api/analyses/run-1/ws?token=tok"
        );

        let config = StreamConfig::new("http://localhost:8080");
        let url = endpoint(&config, &ScopeTarget::AllJobs, "tok").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/api/analyses/ws?token=tok"
        );
    }
}

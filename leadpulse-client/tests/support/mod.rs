//! Shared fixtures for the integration tests: a scriptable WebSocket
//! server, a mock analyses API, and frame builders for the wire envelopes.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode as WsStatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use leadpulse_client::{JobStatus, StreamConfig};

/// Honor `RUST_LOG` during test runs; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with intervals tightened enough for tests to run in
/// milliseconds. Individual tests override single fields on top.
pub fn fast_config(base_url: &str) -> StreamConfig {
    let mut config = StreamConfig::new(base_url);
    config.heartbeat_interval = Duration::from_millis(50);
    config.reconnect_base_delay = Duration::from_millis(30);
    config.poll_interval = Duration::from_millis(50);
    config.stale_after = Duration::from_millis(100);
    config.connect_timeout = Duration::from_secs(5);
    config.subscription_timeout = Duration::from_secs(30);
    config
}

/// Poll a condition until it holds or the deadline lapses.
pub async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Wire frames
// ============================================================================

pub fn ready_frame() -> String {
    json!({"type": "ready"}).to_string()
}

pub fn initial_frame(run_id: &str, status: &str, progress: u8) -> String {
    json!({
        "type": "initial",
        "runId": run_id,
        "data": {"status": status, "progress": progress}
    })
    .to_string()
}

pub fn progress_frame(run_id: &str, status: &str, progress: u8) -> String {
    json!({
        "type": "progress",
        "runId": run_id,
        "data": {"status": status, "progress": progress}
    })
    .to_string()
}

pub fn complete_frame(run_id: &str, lead_id: &str) -> String {
    json!({
        "type": "complete",
        "runId": run_id,
        "data": {"status": "complete", "progress": 100, "lead_id": lead_id}
    })
    .to_string()
}

/// One `data:` event in text/event-stream framing.
pub fn sse_event(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

// ============================================================================
// Scriptable WebSocket server
// ============================================================================

/// What a scripted connection does once the handshake completes.
#[derive(Debug, Clone)]
pub enum WsAction {
    /// Send one text frame.
    Send(String),
    /// Pause between actions.
    Wait(Duration),
    /// Close with a normal (1000) close frame.
    CloseNormal,
    /// Tear the socket down without a close frame.
    Drop,
    /// Stay open until the client disconnects.
    Hold,
}

#[derive(Debug, Clone)]
pub struct ConnPlan {
    pub actions: Vec<WsAction>,
}

impl ConnPlan {
    pub fn new(actions: Vec<WsAction>) -> Self {
        Self { actions }
    }
}

/// Handle onto a running mock WebSocket server.
#[derive(Clone)]
pub struct WsServer {
    pub base_url: String,
    /// Accepted TCP connections (handshake attempts).
    pub connections: Arc<AtomicUsize>,
    /// Connections whose read side has ended.
    pub disconnects: Arc<AtomicUsize>,
    /// Every text frame any connection received.
    pub inbound: Arc<Mutex<Vec<String>>>,
    /// Request URI of every completed handshake.
    pub uris: Arc<Mutex<Vec<String>>>,
    /// Close codes received from clients, in arrival order.
    pub closes: Arc<Mutex<Vec<Option<u16>>>>,
}

/// Serve scripted WebSocket connections; connection n runs `plans[n]`,
/// extra connections hold open.
pub async fn spawn_ws(plans: Vec<ConnPlan>) -> WsServer {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = WsServer {
        base_url: format!("http://{addr}"),
        connections: Arc::new(AtomicUsize::new(0)),
        disconnects: Arc::new(AtomicUsize::new(0)),
        inbound: Arc::new(Mutex::new(Vec::new())),
        uris: Arc::new(Mutex::new(Vec::new())),
        closes: Arc::new(Mutex::new(Vec::new())),
    };

    let state = server.clone();
    tokio::spawn(async move {
        let mut index = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            let plan = plans
                .get(index)
                .cloned()
                .unwrap_or_else(|| ConnPlan::new(vec![WsAction::Hold]));
            index += 1;
            state.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(run_ws_conn(stream, plan, state.clone()));
        }
    });

    server
}

/// Serve a WebSocket endpoint that rejects every handshake with the given
/// HTTP status.
pub async fn spawn_ws_rejecting(status: u16) -> WsServer {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = WsServer {
        base_url: format!("http://{addr}"),
        connections: Arc::new(AtomicUsize::new(0)),
        disconnects: Arc::new(AtomicUsize::new(0)),
        inbound: Arc::new(Mutex::new(Vec::new())),
        uris: Arc::new(Mutex::new(Vec::new())),
        closes: Arc::new(Mutex::new(Vec::new())),
    };

    let state = server.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            state.connections.fetch_add(1, Ordering::SeqCst);
            let uris = state.uris.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, _resp: Response| {
                    uris.lock().unwrap().push(req.uri().to_string());
                    let mut response =
                        ErrorResponse::new(Some("progress stream unavailable".to_string()));
                    *response.status_mut() = WsStatusCode::from_u16(status).unwrap();
                    Err(response)
                };
                let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
            });
        }
    });

    server
}

/// Serve an endpoint that accepts connections and never answers them:
/// the socket opens, then nothing. Exercises handshake bounds.
pub async fn spawn_black_hole() -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("http://{addr}")
}

async fn run_ws_conn(stream: TcpStream, plan: ConnPlan, state: WsServer) {
    let uris = state.uris.clone();
    let callback = move |req: &Request, resp: Response| {
        uris.lock().unwrap().push(req.uri().to_string());
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut sink, mut reader) = ws.split();

    let inbound = state.inbound.clone();
    let disconnects = state.disconnects.clone();
    let closes = state.closes.clone();
    let reader_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = reader.next().await {
            match msg {
                Message::Text(text) => inbound.lock().unwrap().push(text.to_string()),
                Message::Close(frame) => {
                    closes.lock().unwrap().push(frame.map(|f| u16::from(f.code)));
                }
                _ => {}
            }
        }
        disconnects.fetch_add(1, Ordering::SeqCst);
    });

    for action in plan.actions {
        match action {
            WsAction::Send(text) => {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            WsAction::Wait(duration) => tokio::time::sleep(duration).await,
            WsAction::CloseNormal => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "done".into(),
                    })))
                    .await;
                break;
            }
            WsAction::Drop => {
                reader_task.abort();
                return;
            }
            WsAction::Hold => break,
        }
    }
    let _ = reader_task.await;
}

// ============================================================================
// Mock analyses API (SSE + REST)
// ============================================================================

/// Behavior of the mock API. Routes without content answer 404, which is
/// how tests knock individual tiers out.
#[derive(Debug, Default, Clone)]
pub struct MockApi {
    pub run_id: String,
    /// Body served on the run's SSE endpoint, when present.
    pub sse_body: Option<String>,
    /// Staged status responses, one per hit; the last stage repeats.
    pub status_stages: Vec<(JobStatus, u8)>,
    /// Staged active-list responses as raw snapshot values.
    pub active_stages: Vec<Vec<serde_json::Value>>,
}

#[derive(Default)]
pub struct ApiHits {
    pub status: AtomicUsize,
    pub active: AtomicUsize,
    pub stream: AtomicUsize,
    pub last_bearer: Mutex<Option<String>>,
    pub last_stream_token: Mutex<Option<String>>,
    pub last_stream_auth: Mutex<Option<String>>,
}

#[derive(Clone)]
struct ApiCtx {
    api: Arc<MockApi>,
    hits: Arc<ApiHits>,
}

pub async fn spawn_api(api: MockApi) -> (String, Arc<ApiHits>) {
    init_tracing();
    let hits = Arc::new(ApiHits::default());
    let ctx = ApiCtx {
        api: Arc::new(api),
        hits: hits.clone(),
    };

    let app = Router::new()
        .route("/api/analyses/{run_id}/status", get(status_handler))
        .route("/api/analyses/active", get(active_handler))
        .route("/api/analyses/{run_id}/stream", get(stream_handler))
        .with_state(ctx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), hits)
}

async fn status_handler(
    State(ctx): State<ApiCtx>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    record_bearer(&ctx, &headers);
    if run_id != ctx.api.run_id {
        return StatusCode::NOT_FOUND.into_response();
    }
    let n = ctx.hits.status.fetch_add(1, Ordering::SeqCst);
    let Some((status, progress)) = stage(&ctx.api.status_stages, n) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    Json(json!({
        "runId": run_id,
        "status": status.to_string(),
        "progress": progress
    }))
    .into_response()
}

async fn active_handler(State(ctx): State<ApiCtx>, headers: HeaderMap) -> axum::response::Response {
    record_bearer(&ctx, &headers);
    let n = ctx.hits.active.fetch_add(1, Ordering::SeqCst);
    let Some(runs) = stage(&ctx.api.active_stages, n) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    Json(serde_json::Value::Array(runs)).into_response()
}

async fn stream_handler(
    State(ctx): State<ApiCtx>,
    Path(run_id): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if run_id != ctx.api.run_id {
        return StatusCode::NOT_FOUND.into_response();
    }
    ctx.hits.stream.fetch_add(1, Ordering::SeqCst);
    *ctx.hits.last_stream_token.lock().unwrap() = query.get("token").cloned();
    *ctx.hits.last_stream_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match &ctx.api.sse_body {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn record_bearer(ctx: &ApiCtx, headers: &HeaderMap) {
    *ctx.hits.last_bearer.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
}

/// Stage n of a staged response list; the last stage repeats forever.
fn stage<T: Clone>(stages: &[T], n: usize) -> Option<T> {
    if stages.is_empty() {
        return None;
    }
    Some(stages[n.min(stages.len() - 1)].clone())
}

/// Snapshot JSON for an active-list stage.
pub fn active_run(run_id: &str, status: &str, progress: u8) -> serde_json::Value {
    json!({"runId": run_id, "status": status, "progress": progress})
}

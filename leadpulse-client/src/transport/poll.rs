//! REST polling transport
//!
//! Last-resort tier: periodic GETs against the status endpoints. The
//! initial fetch happens during `connect`, so endpoint and token problems
//! surface as handshake failures just like the other tiers, and the
//! snapshots it returns are delivered as the session's first events.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use leadpulse_core::dto::rest::AnalysisSnapshot;

use crate::config::{StreamConfig, TransportKind};
use crate::error::Result;
use crate::reconnect::CLOSE_NORMAL;
use crate::rest::RestClient;
use crate::scope::ScopeTarget;

use super::{TransportEvent, TransportSession, EVENT_BUFFER};

pub(super) async fn connect(
    config: &StreamConfig,
    scope: &ScopeTarget,
    token: &str,
) -> Result<TransportSession> {
    // Snapshot requests are short; bounding each one end to end keeps a
    // hung poll from parking the loop.
    let http = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.connect_timeout)
        .build()?;
    let rest = RestClient::with_client(&config.base_url, http);

    // The first fetch doubles as the handshake: a bad run id, token or
    // unresponsive endpoint fails here instead of inside the io task.
    let first = match scope {
        ScopeTarget::Job(run_id) => vec![rest.analysis_status(run_id, token).await?],
        ScopeTarget::AllJobs => rest.active_analyses(token).await?,
    };

    debug!("Polling started (scope: {}, every {:?})", scope, config.poll_interval);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = match scope {
        ScopeTarget::Job(run_id) => tokio::spawn(poll_job(
            rest,
            run_id.clone(),
            token.to_string(),
            config.poll_interval,
            first,
            events_tx,
            shutdown_rx,
        )),
        ScopeTarget::AllJobs => tokio::spawn(poll_all(
            rest,
            token.to_string(),
            config.poll_interval,
            first,
            events_tx,
            shutdown_rx,
        )),
    };

    Ok(TransportSession {
        kind: TransportKind::Polling,
        events: events_rx,
        outbound: None,
        shutdown: Some(shutdown_tx),
        task,
    })
}

/// Poll a single run until it reaches a terminal state, then close cleanly.
async fn poll_job(
    rest: RestClient,
    run_id: String,
    token: String,
    period: Duration,
    first: Vec<AnalysisSnapshot>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    for snapshot in first {
        if deliver(&events, snapshot).await != Delivered::Live {
            return;
        }
    }

    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match rest.analysis_status(&run_id, &token).await {
                    Ok(snapshot) => {
                        if deliver(&events, snapshot).await != Delivered::Live {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events
                            .send(TransportEvent::Closed { code: None, reason: e.to_string() })
                            .await;
                        return;
                    }
                }
            }
            _ = &mut shutdown => return,
        }
    }
}

/// Poll the active-analyses list indefinitely
///
/// A run that disappears from the list has finished; its final status is
/// fetched once so the terminal state still reaches the store.
async fn poll_all(
    rest: RestClient,
    token: String,
    period: Duration,
    first: Vec<AnalysisSnapshot>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut seen: HashSet<String> = first.iter().map(|s| s.run_id.clone()).collect();
    for snapshot in first {
        if events.send(TransportEvent::Snapshot(snapshot)).await.is_err() {
            return;
        }
    }

    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let list = match rest.active_analyses(&token).await {
                    Ok(list) => list,
                    Err(e) => {
                        let _ = events
                            .send(TransportEvent::Closed { code: None, reason: e.to_string() })
                            .await;
                        return;
                    }
                };

                let current: HashSet<String> =
                    list.iter().map(|s| s.run_id.clone()).collect();
                for snapshot in list {
                    seen.insert(snapshot.run_id.clone());
                    if events.send(TransportEvent::Snapshot(snapshot)).await.is_err() {
                        return;
                    }
                }

                let vanished: Vec<String> =
                    seen.difference(&current).cloned().collect();
                for run_id in vanished {
                    seen.remove(&run_id);
                    match rest.analysis_status(&run_id, &token).await {
                        Ok(snapshot) => {
                            if events.send(TransportEvent::Snapshot(snapshot)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("Could not fetch final status for run {}: {}", run_id, e);
                        }
                    }
                }
            }
            _ = &mut shutdown => return,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Delivered {
    Live,
    Done,
}

/// Forward one snapshot; a terminal status ends the session with a clean
/// close so the supervisor does not try to reconnect.
async fn deliver(events: &mpsc::Sender<TransportEvent>, snapshot: AnalysisSnapshot) -> Delivered {
    let terminal = snapshot.status.is_terminal();
    if events.send(TransportEvent::Snapshot(snapshot)).await.is_err() {
        return Delivered::Done;
    }
    if terminal {
        let _ = events
            .send(TransportEvent::Closed {
                code: Some(CLOSE_NORMAL),
                reason: "analysis reached a terminal state".to_string(),
            })
            .await;
        return Delivered::Done;
    }
    Delivered::Live
}

//! Connection supervision
//!
//! One supervisor task runs per subscribed scope. It owns the transport
//! session, the keep-alive heartbeat, the reconnect budget and the
//! fallback ladder, and feeds every inbound frame through the dispatcher
//! into the store. Consumers observe it through a watch channel of
//! [`ChannelState`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use leadpulse_core::dto::stream::ClientFrame;

use crate::auth::TokenProvider;
use crate::config::{StreamConfig, TransportKind};
use crate::dispatch::Dispatcher;
use crate::error::StreamError;
use crate::heartbeat::Heartbeat;
use crate::reconnect::{close_is_clean, ReconnectPolicy};
use crate::scope::ScopeTarget;
use crate::store::ProgressStore;
use crate::transport::{self, TransportEvent, TransportSession};
use crate::visibility::Visibility;

/// Observable state of one scope's progress channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    /// A connection attempt is underway.
    Connecting,
    /// Live on the given transport tier.
    Connected { transport: TransportKind },
    /// Link lost; waiting out the backoff before the numbered attempt.
    Reconnecting { transport: TransportKind, attempt: u32 },
    /// A tier spent its reconnect budget; falling back to the next one.
    Degraded { transport: TransportKind },
    /// The stream gave up. Runs still in flight were marked failed.
    Failed { failure: StreamFailure },
    /// The stream ended without an error: the run finished, the server
    /// closed cleanly, or the last subscriber left.
    Closed,
}

impl ChannelState {
    /// Whether the channel has ended for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Failed { .. } | ChannelState::Closed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected { .. })
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connecting => f.write_str("connecting"),
            ChannelState::Connected { transport } => write!(f, "connected ({transport})"),
            ChannelState::Reconnecting { transport, attempt } => {
                write!(f, "reconnecting ({transport}, attempt {attempt})")
            }
            ChannelState::Degraded { transport } => write!(f, "falling back to {transport}"),
            ChannelState::Failed { failure } => write!(f, "failed: {failure}"),
            ChannelState::Closed => f.write_str("closed"),
        }
    }
}

/// Why a progress channel ended in failure
///
/// Carried in [`ChannelState::Failed`] so waiters get the error class
/// back, not just its rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFailure {
    /// No access token was available when the first connect needed one.
    MissingToken,
    /// The backend rejected the handshake outright (401/403).
    Rejected { status: u16, message: String },
    /// The subscription ceiling lapsed without a terminal status.
    Timeout { after: Duration },
    /// Every reconnect attempt on the last transport tier failed.
    Exhausted { attempts: u32 },
}

impl StreamFailure {
    /// The equivalent [`StreamError`] for callers.
    pub fn to_error(&self) -> StreamError {
        match self {
            StreamFailure::MissingToken => StreamError::Authentication,
            StreamFailure::Rejected { status, message } => StreamError::ApiError {
                status: *status,
                message: message.clone(),
            },
            StreamFailure::Timeout { after } => StreamError::Timeout { after: *after },
            StreamFailure::Exhausted { attempts } => StreamError::MaxRetriesExceeded {
                attempts: *attempts,
            },
        }
    }

    /// Classify a first-connect authentication error.
    pub(crate) fn from_auth_error(err: StreamError) -> Self {
        match err {
            StreamError::ApiError { status, message } => {
                StreamFailure::Rejected { status, message }
            }
            _ => StreamFailure::MissingToken,
        }
    }
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_error().fmt(f)
    }
}

/// Instruction from the registry to a running supervisor.
#[derive(Debug)]
pub(crate) enum Command {
    Shutdown,
}

/// State shared between the registry and one supervisor
///
/// `closed` is the teardown gate. The supervisor holds it across every
/// store dispatch and `close` takes it to flip the flag, so once `close`
/// returns no frame still in flight can reach the store.
#[derive(Debug)]
pub(crate) struct ScopeShared {
    state: watch::Sender<ChannelState>,
    closed: Mutex<bool>,
}

impl ScopeShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            state,
            closed: Mutex::new(false),
        }
    }

    pub(crate) fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub(crate) fn current_state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_replace(next);
    }

    /// Flip the gate. Blocks until any dispatch holding it has finished.
    pub(crate) fn close(&self) {
        *self.lock_closed() = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.lock_closed()
    }

    /// Run `f` unless the scope is closed, holding the gate so a
    /// concurrent `close` cannot land between the check and the work.
    pub(crate) fn unless_closed(&self, f: impl FnOnce()) {
        let closed = self.lock_closed();
        if !*closed {
            f();
        }
    }

    fn lock_closed(&self) -> MutexGuard<'_, bool> {
        self.closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Why the supervisor stopped.
enum End {
    /// Clean end of stream. The scope's work is done.
    Finished,
    /// Missing or rejected token on the first attempt.
    AuthFailed(StreamFailure),
    /// The last tier spent its reconnect budget.
    Exhausted,
    /// The subscription ceiling lapsed without a terminal status.
    TimedOut,
    /// The last subscriber left.
    Unsubscribed,
}

/// Outcome of driving one live session.
enum DriveEnd {
    /// The transport reported the link closed.
    Ended { code: Option<u16>, reason: String },
    /// Teardown was requested.
    Unsubscribed,
    /// A foreground event found the connection stale; reconnect now.
    Repair,
}

/// Outcome of one backoff wait.
enum Paused {
    Waited,
    /// The app returned to the foreground mid-wait.
    Foregrounded,
    Unsubscribed,
}

enum Flow {
    Continue,
    Stop(End),
}

/// Drives one scope's connection lifecycle to completion
pub(crate) struct Supervisor {
    config: StreamConfig,
    scope: ScopeTarget,
    token: Arc<dyn TokenProvider>,
    dispatcher: Dispatcher,
    store: ProgressStore,
    shared: Arc<ScopeShared>,
    commands: mpsc::Receiver<Command>,
    visibility: watch::Receiver<Visibility>,
}

impl Supervisor {
    pub(crate) fn new(
        config: StreamConfig,
        scope: ScopeTarget,
        token: Arc<dyn TokenProvider>,
        store: ProgressStore,
        shared: Arc<ScopeShared>,
        commands: mpsc::Receiver<Command>,
        visibility: watch::Receiver<Visibility>,
    ) -> Self {
        let dispatcher = Dispatcher::new(scope.clone(), store.clone());
        Self {
            config,
            scope,
            token,
            dispatcher,
            store,
            shared,
            commands,
            visibility,
        }
    }

    pub(crate) async fn run(mut self) {
        // Only single-run subscriptions carry the hard ceiling; the
        // all-analyses scope is open-ended.
        let bounded = matches!(self.scope, ScopeTarget::Job(_));
        let limit = self.config.subscription_timeout;
        let deadline = async move {
            if bounded {
                tokio::time::sleep(limit).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(deadline);

        let end = tokio::select! {
            end = self.run_inner() => end,
            _ = &mut deadline => End::TimedOut,
        };
        self.finish(end);
    }

    async fn run_inner(&mut self) -> End {
        let mut tier = self.config.transport;
        let mut policy = ReconnectPolicy::new(
            self.config.reconnect_base_delay,
            self.config.max_reconnect_attempts,
        );
        let mut connected_once = false;

        loop {
            if self.shared.is_closed() {
                return End::Unsubscribed;
            }

            // Resolve the token fresh before every attempt; a refreshing
            // provider hands out the current one.
            let token = match self.token.access_token().await {
                Some(token) => token,
                None => {
                    if !connected_once {
                        return End::AuthFailed(StreamFailure::MissingToken);
                    }
                    warn!("Access token unavailable for reconnect (scope: {})", self.scope);
                    match self.retry(&mut tier, &mut policy, StreamError::Authentication).await {
                        Flow::Continue => continue,
                        Flow::Stop(end) => return end,
                    }
                }
            };

            let session = match transport::connect(tier, &self.config, &self.scope, &token).await
            {
                Ok(session) => session,
                Err(e) => {
                    if !connected_once && e.is_authentication() {
                        // A rejected token will not get better by retrying.
                        return End::AuthFailed(StreamFailure::from_auth_error(e));
                    }
                    warn!(
                        "Failed to connect over {} (scope: {}): {}",
                        tier, self.scope, e
                    );
                    match self.retry(&mut tier, &mut policy, e).await {
                        Flow::Continue => continue,
                        Flow::Stop(end) => return end,
                    }
                }
            };

            connected_once = true;
            policy.reset();
            self.shared.set_state(ChannelState::Connected {
                transport: session.kind,
            });
            info!(
                "Progress stream connected over {} (scope: {})",
                tier, self.scope
            );

            match self.drive(session).await {
                DriveEnd::Ended { code, reason } => {
                    if self.link_done(code) {
                        debug!("Stream closed cleanly (scope: {}): {}", self.scope, reason);
                        return End::Finished;
                    }
                    warn!("Stream lost (scope: {}): {}", self.scope, reason);
                    match self
                        .retry(&mut tier, &mut policy, StreamError::Connection(reason))
                        .await
                    {
                        Flow::Continue => continue,
                        Flow::Stop(end) => return end,
                    }
                }
                DriveEnd::Unsubscribed => return End::Unsubscribed,
                DriveEnd::Repair => {
                    policy.reset();
                    self.shared.set_state(ChannelState::Connecting);
                }
            }
        }
    }

    /// Pump one live session until it ends or something interrupts it.
    async fn drive(&mut self, mut session: TransportSession) -> DriveEnd {
        let mut heartbeat = session
            .outbound
            .as_ref()
            .map(|_| Heartbeat::new(self.config.heartbeat_interval));
        let mut last_inbound = tokio::time::Instant::now();

        let end = loop {
            tokio::select! {
                event = session.events.recv() => {
                    match event {
                        Some(TransportEvent::Frame(raw)) => {
                            last_inbound = tokio::time::Instant::now();
                            self.shared.unless_closed(|| self.dispatcher.dispatch(&raw));
                        }
                        Some(TransportEvent::Snapshot(snapshot)) => {
                            last_inbound = tokio::time::Instant::now();
                            self.shared
                                .unless_closed(|| self.dispatcher.apply_snapshot(&snapshot));
                        }
                        Some(TransportEvent::Closed { code, reason }) => {
                            break DriveEnd::Ended { code, reason };
                        }
                        None => {
                            break DriveEnd::Ended {
                                code: None,
                                reason: "transport task ended".to_string(),
                            };
                        }
                    }
                }
                _ = heartbeat_due(&mut heartbeat) => {
                    if let Some(outbound) = &session.outbound {
                        if outbound.send(ClientFrame::Ping.to_json()).await.is_err() {
                            break DriveEnd::Ended {
                                code: None,
                                reason: "outbound channel closed".to_string(),
                            };
                        }
                    }
                }
                Some(command) = self.commands.recv() => {
                    match command {
                        Command::Shutdown => break DriveEnd::Unsubscribed,
                    }
                }
                changed = self.visibility.changed() => {
                    if changed.is_err() {
                        break DriveEnd::Unsubscribed;
                    }
                    let foreground =
                        *self.visibility.borrow_and_update() == Visibility::Foreground;
                    if foreground && last_inbound.elapsed() > self.config.stale_after {
                        info!(
                            "Connection stale after returning to foreground; reconnecting (scope: {})",
                            self.scope
                        );
                        break DriveEnd::Repair;
                    }
                }
            }
        };

        session.close().await;
        end
    }

    /// Whether a close ends the scope's work instead of warranting a retry.
    ///
    /// Clean close codes always do. Without one, a single-run scope is done
    /// once its run reached a terminal status (SSE and polling end their
    /// streams that way); the all-analyses scope always reconnects.
    fn link_done(&self, code: Option<u16>) -> bool {
        if close_is_clean(code) {
            return true;
        }
        match &self.scope {
            ScopeTarget::Job(run_id) => self
                .store
                .get(run_id)
                .map(|record| record.is_terminal())
                .unwrap_or(false),
            ScopeTarget::AllJobs => false,
        }
    }

    /// Burn one reconnect attempt, or fall down the ladder when the tier
    /// is spent.
    async fn retry(
        &mut self,
        tier: &mut TransportKind,
        policy: &mut ReconnectPolicy,
        error: StreamError,
    ) -> Flow {
        match policy.next_delay() {
            Some(delay) => {
                self.shared.set_state(ChannelState::Reconnecting {
                    transport: *tier,
                    attempt: policy.attempt(),
                });
                info!(
                    "Reconnecting over {} in {:?} (attempt {} of {}, scope: {})",
                    tier,
                    delay,
                    policy.attempt(),
                    self.config.max_reconnect_attempts,
                    self.scope
                );
                match self.backoff_wait(delay).await {
                    Paused::Waited => Flow::Continue,
                    Paused::Foregrounded => {
                        // The app is back in front of the user; reconnect
                        // now with a fresh budget.
                        policy.reset();
                        Flow::Continue
                    }
                    Paused::Unsubscribed => Flow::Stop(End::Unsubscribed),
                }
            }
            None => {
                if self.config.fallback_enabled {
                    if let Some(next) = tier.downgrade() {
                        warn!(
                            "{} exhausted its reconnect attempts; falling back to {} (scope: {})",
                            tier, next, self.scope
                        );
                        self.shared
                            .set_state(ChannelState::Degraded { transport: next });
                        *tier = next;
                        policy.reset();
                        return Flow::Continue;
                    }
                }
                warn!(
                    "Giving up on the progress stream (scope: {}): {}",
                    self.scope, error
                );
                Flow::Stop(End::Exhausted)
            }
        }
    }

    /// Sleep out a backoff delay, unless teardown or a foreground event
    /// cuts it short.
    async fn backoff_wait(&mut self, delay: Duration) -> Paused {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Paused::Waited,
                Some(command) = self.commands.recv() => {
                    match command {
                        Command::Shutdown => return Paused::Unsubscribed,
                    }
                }
                changed = self.visibility.changed() => {
                    if changed.is_err() {
                        return Paused::Unsubscribed;
                    }
                    if *self.visibility.borrow_and_update() == Visibility::Foreground {
                        return Paused::Foregrounded;
                    }
                }
            }
        }
    }

    fn finish(&self, end: End) {
        match end {
            End::Finished | End::Unsubscribed => {
                self.shared.set_state(ChannelState::Closed);
            }
            End::AuthFailed(failure) => {
                error!("Progress stream failed (scope: {}): {}", self.scope, failure);
                self.shared.set_state(ChannelState::Failed { failure });
            }
            End::TimedOut => {
                self.give_up(StreamFailure::Timeout {
                    after: self.config.subscription_timeout,
                });
            }
            End::Exhausted => {
                self.give_up(StreamFailure::Exhausted {
                    attempts: self.config.max_reconnect_attempts,
                });
            }
        }
    }

    /// The stream will never deliver another frame. Mark what was still in
    /// flight as failed, then flip the state so waiters see records first.
    fn give_up(&self, failure: StreamFailure) {
        self.fail_active_jobs(&failure);
        error!("Progress stream failed (scope: {}): {}", self.scope, failure);
        self.shared.set_state(ChannelState::Failed { failure });
    }

    fn fail_active_jobs(&self, failure: &StreamFailure) {
        let message = failure.to_string();
        self.shared.unless_closed(|| match &self.scope {
            ScopeTarget::Job(run_id) => {
                self.store.force_fail(run_id, &message);
            }
            ScopeTarget::AllJobs => {
                for record in self.store.snapshot() {
                    if !record.is_terminal() {
                        self.store.force_fail(&record.run_id, &message);
                    }
                }
            }
        });
    }
}

/// Next heartbeat deadline; pends forever on receive-only transports.
async fn heartbeat_due(heartbeat: &mut Option<Heartbeat>) {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => std::future::pending().await,
    }
}

//! Client facade and channel registry
//!
//! [`ProgressClient`] hands out [`Subscription`]s and multiplexes them over
//! per-scope channels: any number of subscriptions to the same scope share
//! one supervisor, one transport connection and one store. The last
//! subscription out tears the channel down.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use leadpulse_core::domain::job::JobProgress;

use crate::auth::TokenProvider;
use crate::config::StreamConfig;
use crate::connection::{ChannelState, Command, ScopeShared, Supervisor};
use crate::error::{Result, StreamError};
use crate::rest::RestClient;
use crate::scope::ScopeTarget;
use crate::store::ProgressStore;
use crate::visibility::VisibilityHandle;

/// Entry point for the LeadPulse progress stream
///
/// Owns the progress store, the visibility signal and every live channel.
/// Cheap to clone; clones share all of it.
///
/// # Example
///
/// ```no_run
/// use leadpulse_client::{ProgressClient, StaticToken, StreamConfig};
///
/// # async fn demo() -> leadpulse_client::Result<()> {
/// let config = StreamConfig::new("https://api.leadpulse.io");
/// let client = ProgressClient::new(config, StaticToken::new("token"))?;
///
/// let mut subscription = client.subscribe("run-42");
/// let record = subscription.wait_terminal().await?;
/// println!("analysis finished: {}", record.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProgressClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: StreamConfig,
    token: Arc<dyn TokenProvider>,
    store: ProgressStore,
    visibility: VisibilityHandle,
    scopes: Mutex<HashMap<ScopeTarget, ScopeEntry>>,
}

/// One live channel and the number of subscriptions sharing it.
struct ScopeEntry {
    shared: Arc<ScopeShared>,
    commands: mpsc::Sender<Command>,
    subscribers: usize,
    task: JoinHandle<()>,
}

impl ProgressClient {
    /// Create a client. Fails when the configuration does not validate.
    pub fn new(config: StreamConfig, token: impl TokenProvider + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                token: Arc::new(token),
                store: ProgressStore::new(),
                visibility: VisibilityHandle::new(),
                scopes: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// The shared progress store, for readers that outlive any one
    /// subscription.
    pub fn store(&self) -> ProgressStore {
        self.inner.store.clone()
    }

    /// Handle for reporting host visibility transitions.
    pub fn visibility(&self) -> VisibilityHandle {
        self.inner.visibility.clone()
    }

    /// REST client against the same API, for one-shot status checks.
    pub fn rest(&self) -> RestClient {
        RestClient::new(&self.inner.config.base_url)
    }

    /// Subscribe to one analysis run.
    pub fn subscribe(&self, run_id: impl Into<String>) -> Subscription {
        self.subscribe_scope(ScopeTarget::job(run_id))
    }

    /// Subscribe to every analysis run of the authenticated user.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe_scope(ScopeTarget::AllJobs)
    }

    /// Number of live channels (not subscriptions).
    pub fn active_channels(&self) -> usize {
        self.inner.lock_scopes().len()
    }

    /// Tear down every channel and wait briefly for their tasks to stop.
    pub async fn shutdown(&self) {
        let entries: Vec<ScopeEntry> = {
            let mut scopes = self.inner.lock_scopes();
            scopes.drain().map(|(_, entry)| entry).collect()
        };
        if entries.is_empty() {
            return;
        }

        info!("Shutting down {} progress channel(s)", entries.len());
        for entry in &entries {
            entry.shared.close();
            let _ = entry.commands.try_send(Command::Shutdown);
        }
        for entry in entries {
            let _ = tokio::time::timeout(Duration::from_secs(1), entry.task).await;
        }
    }

    fn subscribe_scope(&self, scope: ScopeTarget) -> Subscription {
        let mut scopes = self.inner.lock_scopes();
        let entry = match scopes.entry(scope.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().shared.current_state().is_terminal() {
                    // The previous channel already ended. Subscribers still
                    // holding it keep their terminal view; new ones get a
                    // fresh channel, with the old refcount carried over so
                    // their eventual drops stay balanced.
                    let mut fresh = self.inner.spawn_scope(&scope);
                    fresh.subscribers = occupied.get().subscribers;
                    occupied.insert(fresh);
                }
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(self.inner.spawn_scope(&scope)),
        };
        entry.subscribers += 1;
        debug!(
            "Subscribed (scope: {}, subscribers: {})",
            scope, entry.subscribers
        );

        Subscription {
            scope,
            client: Arc::clone(&self.inner),
            store: self.inner.store.clone(),
            shared: Arc::clone(&entry.shared),
            state: entry.shared.state(),
            changes: self.inner.store.watch(),
        }
    }
}

impl ClientInner {
    fn spawn_scope(&self, scope: &ScopeTarget) -> ScopeEntry {
        let shared = Arc::new(ScopeShared::new());
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let supervisor = Supervisor::new(
            self.config.clone(),
            scope.clone(),
            Arc::clone(&self.token),
            self.store.clone(),
            Arc::clone(&shared),
            commands_rx,
            self.visibility.subscribe(),
        );
        let task = tokio::spawn(supervisor.run());
        debug!("Opened progress channel (scope: {})", scope);

        ScopeEntry {
            shared,
            commands: commands_tx,
            subscribers: 0,
            task,
        }
    }

    fn unsubscribe(&self, scope: &ScopeTarget) {
        let mut scopes = self.lock_scopes();
        let Some(entry) = scopes.get_mut(scope) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return;
        }

        if let Some(entry) = scopes.remove(scope) {
            // Flip the gate before signalling: once `close` returns, no
            // frame still in flight can reach the store.
            entry.shared.close();
            let _ = entry.commands.try_send(Command::Shutdown);
            debug!("Closed progress channel (scope: {})", scope);
        }
        drop(scopes);

        if let ScopeTarget::Job(run_id) = scope {
            self.store.remove(run_id);
        }
    }

    fn lock_scopes(&self) -> MutexGuard<'_, HashMap<ScopeTarget, ScopeEntry>> {
        self.scopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One consumer's view of a scope's progress channel
///
/// Dropping it releases the scope; the underlying connection closes when
/// the last subscription for that scope is gone.
pub struct Subscription {
    scope: ScopeTarget,
    client: Arc<ClientInner>,
    store: ProgressStore,
    shared: Arc<ScopeShared>,
    state: watch::Receiver<ChannelState>,
    changes: watch::Receiver<u64>,
}

impl Subscription {
    pub fn scope(&self) -> &ScopeTarget {
        &self.scope
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.current_state()
    }

    /// Latest record for the subscribed run. `None` on the all-analyses
    /// scope or before the first frame lands.
    pub fn progress(&self) -> Option<JobProgress> {
        self.scope.run_id().and_then(|run_id| self.store.get(run_id))
    }

    /// Latest record of every run the store knows.
    pub fn snapshot(&self) -> Vec<JobProgress> {
        self.store.snapshot()
    }

    /// Wait until the progress data or the channel state moves.
    pub async fn changed(&mut self) {
        tokio::select! {
            _ = self.changes.changed() => {}
            _ = self.state.changed() => {}
        }
    }

    /// Wait for the subscribed run to reach a terminal status.
    ///
    /// Resolves with the terminal record whether the run completed, failed
    /// or was cancelled; synthetic failures (timeout, exhausted reconnects)
    /// surface the same way. Errs only when no terminal record will ever
    /// arrive: the token was rejected outright, or the channel closed with
    /// the run still in flight. The error keeps its class, so a rejected
    /// token still answers to [`StreamError::is_authentication`].
    pub async fn wait_terminal(&mut self) -> Result<JobProgress> {
        let Some(run_id) = self.scope.run_id().map(str::to_string) else {
            return Err(StreamError::Config(
                "wait_terminal needs a single-run subscription".to_string(),
            ));
        };

        loop {
            if let Some(record) = self.store.get(&run_id) {
                if record.is_terminal() {
                    return Ok(record);
                }
            }

            // Terminal records land before the state flips, so this order
            // cannot miss one.
            match self.shared.current_state() {
                ChannelState::Failed { failure } => return Err(failure.to_error()),
                ChannelState::Closed => return Err(StreamError::Closed),
                _ => {}
            }

            self.changed().await;
        }
    }

    /// Release this subscription now. Equivalent to dropping it: the scope's
    /// channel closes once its last subscription is gone, and after this
    /// returns no further store mutation happens on that channel's behalf.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.unsubscribe(&self.scope);
    }
}

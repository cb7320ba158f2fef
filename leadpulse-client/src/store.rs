//! Progress state store
//!
//! Holds the latest known progress record per analysis run. The dispatcher
//! is the only writer; subscriptions and the CLI read. A watch channel
//! carries a version counter so readers can await "something changed"
//! without polling the map.
//!
//! Once a record reaches a terminal status it never mutates again. That is
//! the sole ordering safeguard on the stream: late or replayed frames for a
//! finished run are logged and dropped here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use leadpulse_core::domain::job::{JobProgress, JobStatus};
use leadpulse_core::dto::stream::ProgressPayload;

/// Shared map of run id -> latest progress record
#[derive(Debug, Clone)]
pub struct ProgressStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    records: Mutex<HashMap<String, JobProgress>>,
    version: watch::Sender<u64>,
}

impl ProgressStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                records: Mutex::new(HashMap::new()),
                version,
            }),
        }
    }

    /// Latest record for one run, if any.
    pub fn get(&self, run_id: &str) -> Option<JobProgress> {
        self.lock_records().get(run_id).cloned()
    }

    /// Copy of every record currently held.
    pub fn snapshot(&self) -> Vec<JobProgress> {
        self.lock_records().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// Receiver on the store's version counter; bumped on every accepted
    /// mutation.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Merge a lifecycle payload into a run's record.
    pub(crate) fn apply(
        &self,
        run_id: &str,
        payload: &ProgressPayload,
        at: DateTime<Utc>,
    ) -> bool {
        self.mutate(run_id, at, |record| merge_payload(record, payload))
    }

    /// Mark a run complete. The event kind is authoritative: status becomes
    /// `complete` and progress 100 regardless of what the payload carried.
    pub(crate) fn complete(
        &self,
        run_id: &str,
        payload: &ProgressPayload,
        at: DateTime<Utc>,
    ) -> bool {
        self.mutate(run_id, at, |record| {
            merge_payload(record, payload);
            record.status = JobStatus::Complete;
            record.progress = 100;
        })
    }

    /// Mark a run failed from a wire event.
    pub(crate) fn mark_failed(
        &self,
        run_id: &str,
        payload: &ProgressPayload,
        at: DateTime<Utc>,
    ) -> bool {
        self.mutate(run_id, at, |record| {
            merge_payload(record, payload);
            record.status = JobStatus::Failed;
            if record.error.is_none() {
                record.error = Some("analysis failed".to_string());
            }
        })
    }

    /// Mark a run cancelled.
    pub(crate) fn cancel(
        &self,
        run_id: &str,
        payload: &ProgressPayload,
        at: DateTime<Utc>,
    ) -> bool {
        self.mutate(run_id, at, |record| {
            merge_payload(record, payload);
            record.status = JobStatus::Cancelled;
        })
    }

    /// Force a run into `failed` without a wire event. Used when the
    /// subscription times out or every reconnect attempt is spent. A run
    /// that already reached a real terminal state is left untouched.
    pub(crate) fn force_fail(&self, run_id: &str, message: &str) -> bool {
        self.mutate(run_id, Utc::now(), |record| {
            record.status = JobStatus::Failed;
            record.error = Some(message.to_string());
        })
    }

    /// Drop a run's record entirely.
    pub(crate) fn remove(&self, run_id: &str) -> Option<JobProgress> {
        let removed = self.lock_records().remove(run_id);
        if removed.is_some() {
            self.touch_version();
        }
        removed
    }

    fn mutate(
        &self,
        run_id: &str,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut JobProgress),
    ) -> bool {
        let mut records = self.lock_records();
        let record = records
            .entry(run_id.to_string())
            .or_insert_with(|| JobProgress::new(run_id));

        if record.is_terminal() {
            debug!(
                "Dropping late update for run {}: already {}",
                run_id, record.status
            );
            return false;
        }

        f(record);
        record.updated_at = at;
        drop(records);

        self.touch_version();
        true
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, JobProgress>> {
        // A poisoned lock only means a panic elsewhere; the map itself is
        // still consistent.
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch_version(&self) {
        self.inner.version.send_modify(|v| *v += 1);
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_payload(record: &mut JobProgress, payload: &ProgressPayload) {
    if let Some(status) = payload.status {
        // Statuses only move forward; a stale frame cannot drag a record
        // backwards.
        if record.status.can_transition_to(status) {
            record.status = status;
        }
    }
    if let Some(progress) = payload.progress {
        record.progress = progress.min(100);
    }
    if let Some(step) = payload.step {
        record.step = Some(step);
    }
    if let Some(current_step) = &payload.current_step {
        record.current_step = Some(current_step.clone());
    }
    if let Some(lead_id) = &payload.lead_id {
        record.lead_id = Some(lead_id.clone());
    }
    if let Some(avatar_url) = &payload.avatar_url {
        record.avatar_url = Some(avatar_url.clone());
    }
    if let Some(error) = &payload.error {
        record.error = Some(error.clone());
    }
}

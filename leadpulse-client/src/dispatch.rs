//! Stream frame dispatch
//!
//! Decodes inbound frames and routes them into the progress store. Decoding
//! is tolerant per message: a malformed or unknown frame is logged and
//! dropped without disturbing the connection or the store.

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use leadpulse_core::domain::job::JobStatus;
use leadpulse_core::dto::rest::AnalysisSnapshot;
use leadpulse_core::dto::stream::StreamEvent;

use crate::scope::ScopeTarget;
use crate::store::ProgressStore;

/// Routes decoded frames for one scope into its store
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    scope: ScopeTarget,
    store: ProgressStore,
}

impl Dispatcher {
    pub(crate) fn new(scope: ScopeTarget, store: ProgressStore) -> Self {
        Self { scope, store }
    }

    /// Decode and route one raw text frame.
    pub(crate) fn dispatch(&self, raw: &str) {
        match StreamEvent::parse(raw) {
            Ok(event) => self.route(event),
            Err(e) => warn!("Dropping undecodable stream frame: {}", e),
        }
    }

    fn route(&self, event: StreamEvent) {
        match event {
            StreamEvent::Ready { .. } => {
                debug!("Stream ready (scope: {})", self.scope);
            }
            StreamEvent::Pong { .. } | StreamEvent::Ack { .. } => {
                trace!("Keep-alive acknowledged (scope: {})", self.scope);
            }
            StreamEvent::Initial {
                run_id,
                data,
                timestamp,
            }
            | StreamEvent::Progress {
                run_id,
                data,
                timestamp,
            } => {
                if let Some(run_id) = self.target(run_id) {
                    self.store.apply(&run_id, &data, stamp(timestamp));
                }
            }
            StreamEvent::Complete {
                run_id,
                data,
                timestamp,
            } => {
                if let Some(run_id) = self.target(run_id) {
                    self.store.complete(&run_id, &data, stamp(timestamp));
                }
            }
            StreamEvent::Failed {
                run_id,
                data,
                timestamp,
            } => {
                if let Some(run_id) = self.target(run_id) {
                    self.store.mark_failed(&run_id, &data, stamp(timestamp));
                }
            }
            StreamEvent::Cancelled {
                run_id,
                data,
                timestamp,
            } => {
                if let Some(run_id) = self.target(run_id) {
                    self.store.cancel(&run_id, &data, stamp(timestamp));
                }
            }
            StreamEvent::Unknown => {
                debug!("Ignoring unknown stream event kind (scope: {})", self.scope);
            }
        }
    }

    /// Route one REST snapshot (polling tier and visibility repair).
    pub(crate) fn apply_snapshot(&self, snapshot: &AnalysisSnapshot) {
        let payload = snapshot.to_payload();
        let at = Utc::now();
        match snapshot.status {
            JobStatus::Complete => self.store.complete(&snapshot.run_id, &payload, at),
            JobStatus::Failed => self.store.mark_failed(&snapshot.run_id, &payload, at),
            JobStatus::Cancelled => self.store.cancel(&snapshot.run_id, &payload, at),
            _ => self.store.apply(&snapshot.run_id, &payload, at),
        };
    }

    /// Target run for a lifecycle frame: its explicit runId, else the run
    /// the scope pins.
    fn target(&self, run_id: Option<String>) -> Option<String> {
        match run_id {
            Some(id) => Some(id),
            None => match self.scope.run_id() {
                Some(id) => Some(id.to_string()),
                None => {
                    warn!("Dropping lifecycle frame without a runId on the all-analyses scope");
                    None
                }
            },
        }
    }
}

fn stamp(timestamp: Option<i64>) -> DateTime<Utc> {
    timestamp
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_dispatcher(run_id: &str) -> (Dispatcher, ProgressStore) {
        let store = ProgressStore::new();
        (
            Dispatcher::new(ScopeTarget::job(run_id), store.clone()),
            store,
        )
    }

    #[test]
    fn test_lifecycle_sequence() {
        let (dispatcher, store) = job_dispatcher("run-1");

        dispatcher.dispatch(r#"{"type":"ready"}"#);
        dispatcher.dispatch(
            r#"{"type":"initial","runId":"run-1","data":{"status":"pending","progress":0}}"#,
        );
        dispatcher.dispatch(
            r#"{"type":"progress","runId":"run-1","data":{"status":"analyzing","progress":40,"step":{"current":1,"total":4},"current_step":"Enriching contact profile"}}"#,
        );
        dispatcher.dispatch(
            r#"{"type":"progress","runId":"run-1","data":{"progress":80,"step":{"current":3,"total":4}}}"#,
        );
        dispatcher.dispatch(
            r#"{"type":"complete","runId":"run-1","data":{"status":"complete","progress":100,"lead_id":"lead-42"}}"#,
        );
        // Late duplicate after the terminal event changes nothing.
        dispatcher.dispatch(
            r#"{"type":"progress","runId":"run-1","data":{"progress":80}}"#,
        );

        let record = store.get("run-1").unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.progress, 100);
        assert_eq!(record.lead_id.as_deref(), Some("lead-42"));
        assert_eq!(record.step.map(|s| s.current), Some(3));
    }

    #[test]
    fn test_unknown_and_malformed_frames_are_inert() {
        let (dispatcher, store) = job_dispatcher("run-1");

        dispatcher.dispatch(r#"{"type":"telemetry","data":{"cpu":0.9}}"#);
        dispatcher.dispatch("{definitely not json");
        dispatcher.dispatch(r#"{"runId":"run-1"}"#);
        dispatcher.dispatch(r#"{"type":"pong"}"#);

        assert!(store.is_empty());
    }

    #[test]
    fn test_missing_run_id_falls_back_to_scope() {
        let (dispatcher, store) = job_dispatcher("run-7");

        dispatcher.dispatch(r#"{"type":"progress","data":{"status":"analyzing","progress":25}}"#);

        let record = store.get("run-7").unwrap();
        assert_eq!(record.progress, 25);
    }

    #[test]
    fn test_missing_run_id_dropped_on_all_scope() {
        let store = ProgressStore::new();
        let dispatcher = Dispatcher::new(ScopeTarget::AllJobs, store.clone());

        dispatcher.dispatch(r#"{"type":"progress","data":{"progress":10}}"#);
        assert!(store.is_empty());

        dispatcher.dispatch(r#"{"type":"progress","runId":"run-2","data":{"progress":10}}"#);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_frame_captures_error() {
        let (dispatcher, store) = job_dispatcher("run-1");

        dispatcher.dispatch(
            r#"{"type":"failed","runId":"run-1","data":{"error":"provider quota exceeded"}}"#,
        );

        let record = store.get("run-1").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("provider quota exceeded"));
    }

    #[test]
    fn test_snapshot_routes_by_status() {
        let (dispatcher, store) = job_dispatcher("run-1");

        let running: AnalysisSnapshot = serde_json::from_str(
            r#"{"runId":"run-1","status":"analyzing","progress":30}"#,
        )
        .unwrap();
        dispatcher.apply_snapshot(&running);
        assert_eq!(store.get("run-1").unwrap().status, JobStatus::Analyzing);

        let done: AnalysisSnapshot = serde_json::from_str(
            r#"{"runId":"run-1","status":"complete","progress":100,"lead_id":"lead-9"}"#,
        )
        .unwrap();
        dispatcher.apply_snapshot(&done);
        let record = store.get("run-1").unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.lead_id.as_deref(), Some("lead-9"));
    }

    #[test]
    fn test_event_timestamp_lands_on_record() {
        let (dispatcher, store) = job_dispatcher("run-1");

        dispatcher.dispatch(
            r#"{"type":"progress","runId":"run-1","data":{"progress":5},"timestamp":1712345678901}"#,
        );

        let record = store.get("run-1").unwrap();
        assert_eq!(record.updated_at.timestamp_millis(), 1712345678901);
    }
}

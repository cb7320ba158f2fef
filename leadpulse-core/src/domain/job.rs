//! Analysis job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status ends the job lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a job may move from this status to `next`.
    ///
    /// Statuses only move forward: `pending -> analyzing -> {complete,
    /// failed, cancelled}`. A status may always restate itself; a terminal
    /// status never changes.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            JobStatus::Pending => true,
            JobStatus::Analyzing => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Position within a multi-step analysis pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub current: u32,
    pub total: u32,
}

/// Latest known progress for one analysis run
///
/// Structure maintained by the streaming client (merges stream updates) and
/// read by consumers (renders progress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub run_id: String,
    pub status: JobStatus,
    /// Completion percentage, 0-100.
    pub progress: u8,
    pub step: Option<StepProgress>,
    pub current_step: Option<String>,
    pub lead_id: Option<String>,
    pub avatar_url: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    /// Fresh record for a run nothing has been heard about yet.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: JobStatus::Pending,
            progress: 0,
            step: None,
            current_step: None,
            lead_id: None,
            avatar_url: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Analyzing.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Analyzing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Analyzing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Analyzing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Analyzing).unwrap();
        assert_eq!(json, "\"analyzing\"");
        let back: JobStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, JobStatus::Cancelled);
    }
}

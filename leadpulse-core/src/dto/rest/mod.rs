//! REST snapshot bodies for the analyses API

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobStatus, StepProgress};
use crate::dto::stream::ProgressPayload;

/// Point-in-time state of one analysis run
///
/// Returned by the per-run status endpoint and, as a list, by the
/// active-analyses endpoint. Used to seed or repair stream state and as the
/// polling fallback's data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub step: Option<StepProgress>,
    pub current_step: Option<String>,
    pub lead_id: Option<String>,
    pub avatar_url: Option<String>,
    pub error: Option<String>,
}

impl AnalysisSnapshot {
    /// View this snapshot as a stream payload so both wire paths share one
    /// merge routine.
    pub fn to_payload(&self) -> ProgressPayload {
        ProgressPayload {
            status: Some(self.status),
            progress: self.progress,
            step: self.step,
            current_step: self.current_step.clone(),
            lead_id: self.lead_id.clone(),
            avatar_url: self.avatar_url.clone(),
            error: self.error.clone(),
        }
    }
}

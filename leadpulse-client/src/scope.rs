//! Subscription scopes

/// What one progress subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeTarget {
    /// A single analysis run.
    Job(String),
    /// Every analysis run owned by the authenticated user.
    AllJobs,
}

impl ScopeTarget {
    pub fn job(run_id: impl Into<String>) -> Self {
        ScopeTarget::Job(run_id.into())
    }

    /// Run id this scope pins, if it pins one.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            ScopeTarget::Job(run_id) => Some(run_id),
            ScopeTarget::AllJobs => None,
        }
    }
}

impl std::fmt::Display for ScopeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeTarget::Job(run_id) => f.write_str(run_id),
            ScopeTarget::AllJobs => f.write_str("all-analyses"),
        }
    }
}

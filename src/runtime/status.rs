use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle state of an instance: `Pending → Running → terminal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OrchestrationStatus {
    /// Started, no replay pass has scheduled anything yet.
    Pending,
    Running,
    Completed { output: String },
    Failed { error: Error },
    Terminated { reason: String },
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed { .. }
                | OrchestrationStatus::Failed { .. }
                | OrchestrationStatus::Terminated { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationStatus::Pending => "Pending",
            OrchestrationStatus::Running => "Running",
            OrchestrationStatus::Completed { .. } => "Completed",
            OrchestrationStatus::Failed { .. } => "Failed",
            OrchestrationStatus::Terminated { .. } => "Terminated",
        }
    }
}

/// Point-in-time view of one instance, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub name: String,
    #[serde(flatten)]
    pub status: OrchestrationStatus,
    pub input: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl InstanceSnapshot {
    /// Output payload, set only once the instance completed.
    pub fn output(&self) -> Option<&str> {
        match &self.status {
            OrchestrationStatus::Completed { output } => Some(output),
            _ => None,
        }
    }
}

/// Error returned by the wait helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for the instance to finish")]
    Timeout,
    #[error(transparent)]
    Other(#[from] Error),
}

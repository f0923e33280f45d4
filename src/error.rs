//! Error taxonomy shared by the history log, the replay engine and the runtime.
//!
//! `Error` is serializable because terminal failures are persisted in history
//! (`Event::OrchestratorFailed`) and must survive a process restart unchanged.

use serde::{Deserialize, Serialize};

pub use crate::providers::error::ProviderError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An activity reported failure. Orchestrator code receives this when it
/// awaits a task whose history entry is `TaskFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("activity '{name}' (task {task_id}) failed: {message}")]
pub struct ActivityError {
    pub task_id: u64,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// A completion referenced a task with no prior `TaskScheduled`.
    /// Always a bug in the executor or the dispatcher.
    #[error("out of order: task {task_id} has no matching TaskScheduled")]
    OutOfOrder { task_id: u64 },

    /// Replayed orchestrator code diverged from recorded history.
    #[error("nondeterministic orchestration: {message}")]
    NonDeterminism { message: String },

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error("instance not found: {instance}")]
    NotFound { instance: String },

    #[error("no orchestration registered under '{name}'")]
    UnknownOrchestrator { name: String },

    /// Orchestrator code returned an error of its own.
    #[error("{message}")]
    Application { message: String },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("payload codec error: {message}")]
    Codec { message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Error {
    pub fn application(message: impl Into<String>) -> Self {
        Error::Application { message: message.into() }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState { message: message.into() }
    }

    pub fn not_found(instance: impl Into<String>) -> Self {
        Error::NotFound { instance: instance.into() }
    }

    pub(crate) fn nondeterminism(message: impl Into<String>) -> Self {
        Error::NonDeterminism { message: message.into() }
    }

    pub(crate) fn codec(message: impl std::fmt::Display) -> Self {
        Error::Codec { message: message.to_string() }
    }

    /// Only provider errors flagged as transient are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider(p) if p.is_retryable())
    }
}

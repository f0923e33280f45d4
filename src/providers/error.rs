use serde::{Deserialize, Serialize};

/// Storage failure with retry classification.
///
/// Providers return this to tell the runtime whether an operation is worth
/// repeating. The runtime only retries errors where `is_retryable()` is true.
///
/// **Retryable**: interrupted or timed-out I/O, a busy backing store.
///
/// **Permanent**: corrupt history lines, invalid instance names, capacity
/// limits, anything that will fail the same way on the next attempt.
///
/// ```rust
/// use durable_tasks::providers::ProviderError;
///
/// let busy = ProviderError::retryable("append", "file is locked");
/// assert!(busy.is_retryable());
///
/// let corrupt = ProviderError::permanent("read", "line 3 is not a valid event");
/// assert!(!corrupt.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{operation}: {message}")]
pub struct ProviderError {
    /// Operation that failed (e.g. "append", "read")
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Classify an I/O error. Interruptions and timeouts are transient.
    pub fn from_io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Self::retryable(operation, err.to_string())
            }
            _ => Self::permanent(operation, err.to_string()),
        }
    }
}

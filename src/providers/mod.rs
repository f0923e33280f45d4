use crate::{Event, Result};

pub mod error;
/// In-memory provider for tests.
pub mod in_memory;
/// Filesystem-backed provider, durable across restarts.
pub mod fs;

pub use error::ProviderError;

/// Durable storage for per-instance history logs.
///
/// Providers are datastores only; the runtime owns queues, workers and the
/// per-instance single-writer discipline. Every provider validates appends
/// through `HistoryLog`, so a batch either satisfies the log invariants and is
/// stored, or nothing from it is.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create an empty log. Fails with `InvalidState` if the instance exists.
    async fn create_instance(&self, instance: &str) -> Result<()>;

    /// Full ordered history. Unknown instances read as empty.
    async fn read(&self, instance: &str) -> Result<Vec<Event>>;

    /// Append a batch atomically. Returns how many events were stored; events
    /// that are duplicates of an already-recorded terminal event are skipped.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown instances, `OutOfOrder`/`InvalidState` when the
    /// batch violates log invariants, `Provider` for storage failures.
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<usize>;

    async fn list_instances(&self) -> Result<Vec<String>>;

    /// Remove an instance and its history. `NotFound` if absent.
    async fn remove_instance(&self, instance: &str) -> Result<()>;

    /// Pretty-printed dump of all instances (test utility).
    async fn dump_all_pretty(&self) -> Result<String> {
        let mut out = String::new();
        let mut instances = self.list_instances().await?;
        instances.sort();
        for inst in instances {
            out.push_str(&format!("instance={inst}\n"));
            for e in self.read(&inst).await? {
                out.push_str(&format!("  {e:?}\n"));
            }
        }
        Ok(out)
    }
}

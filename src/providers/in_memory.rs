use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{HistoryStore, ProviderError};
use crate::history::{AppendOutcome, HistoryLog};
use crate::{Error, Event, Result};

/// Keeps every log in a map; nothing survives the process.
///
/// Unbounded by default. `with_cap` limits each log for hosts that want a
/// memory ceiling.
pub struct InMemoryHistoryStore {
    inner: Mutex<HashMap<String, HistoryLog>>,
    cap: Option<usize>,
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cap: None,
        }
    }
}

impl InMemoryHistoryStore {
    /// Store that rejects, with a permanent `ProviderError`, any batch that
    /// would grow a log past `cap` events. Instance-terminal events are not
    /// counted, so the runtime can always record the resulting failure.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cap: Some(cap),
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_instance(&self, instance: &str) -> Result<()> {
        let mut g = self.inner.lock().await;
        if g.contains_key(instance) {
            return Err(Error::invalid_state(format!("instance already exists: {instance}")));
        }
        g.insert(instance.to_string(), HistoryLog::new());
        Ok(())
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>> {
        let g = self.inner.lock().await;
        Ok(g.get(instance).map(|log| log.events().to_vec()).unwrap_or_default())
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<usize> {
        let mut g = self.inner.lock().await;
        let log = g.get_mut(instance).ok_or_else(|| Error::not_found(instance))?;
        if let Some(cap) = self.cap {
            let growth = new_events.iter().filter(|e| !e.is_instance_terminal()).count();
            if log.len() + growth > cap {
                return Err(ProviderError::permanent(
                    "append",
                    format!("history cap exceeded (cap={cap}, have={}, append={growth})", log.len()),
                )
                .into());
            }
        }
        // Validate against a scratch copy so a bad batch leaves no trace.
        let mut staged = log.clone();
        let mut appended = 0;
        for e in new_events {
            if staged.append(e)? == AppendOutcome::Appended {
                appended += 1;
            }
        }
        *log = staged;
        Ok(appended)
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.keys().cloned().collect())
    }

    async fn remove_instance(&self, instance: &str) -> Result<()> {
        let mut g = self.inner.lock().await;
        if g.remove(instance).is_none() {
            return Err(Error::not_found(instance));
        }
        Ok(())
    }
}

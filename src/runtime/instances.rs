//! Instance manager: start, query, terminate, wait.

use std::time::Duration;

use tracing::{info, warn};

use super::{now_ms, InstanceRecord, InstanceSnapshot, OrchestrationStatus, Runtime, WaitError};
use crate::history::HistoryLog;
use crate::{Error, Event, Result};

impl Runtime {
    /// Start a new instance of orchestration `name` under a fresh id.
    pub async fn start_orchestration(&self, name: impl Into<String>, input: impl Into<String>) -> Result<String> {
        let instance = uuid::Uuid::new_v4().to_string();
        self.start_orchestration_with_id(&instance, name, input).await?;
        Ok(instance)
    }

    /// Start an instance under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the id is already in use. If the start event cannot
    /// be stored, the store error is returned and nothing is left behind.
    pub async fn start_orchestration_with_id(
        &self,
        instance: &str,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        let input = input.into();
        let created_at_ms = now_ms();

        let lock = self.instance_lock(instance).await;
        let _guard = lock.lock().await;

        self.history_store.create_instance(instance).await?;
        let started = Event::OrchestratorStarted {
            name: name.clone(),
            input: input.clone(),
            created_at_ms,
        };
        if let Err(e) = self.append_history(instance, vec![started]).await {
            // Drop the empty log so the id can be used again.
            if let Err(cleanup) = self.history_store.remove_instance(instance).await {
                warn!(instance, error = %cleanup, "cannot remove instance after failed start");
            }
            return Err(e);
        }
        self.instances.lock().await.insert(
            instance.to_string(),
            InstanceRecord {
                name: name.clone(),
                input,
                status: OrchestrationStatus::Pending,
                created_at_ms,
                updated_at_ms: created_at_ms,
            },
        );
        info!(instance, orchestration = %name, "orchestration started");
        self.enqueue_pass(instance);
        Ok(())
    }

    /// Current snapshot. Falls back to the durable log when the instance was
    /// created by an earlier process.
    pub async fn get_status(&self, instance: &str) -> Result<InstanceSnapshot> {
        if let Some(rec) = self.instances.lock().await.get(instance) {
            return Ok(InstanceSnapshot {
                instance_id: instance.to_string(),
                name: rec.name.clone(),
                status: rec.status.clone(),
                input: rec.input.clone(),
                created_at_ms: rec.created_at_ms,
                updated_at_ms: rec.updated_at_ms,
            });
        }

        let log = HistoryLog::from_events(self.read_history(instance).await?)?;
        let Some((name, input, created_at_ms)) = log.started() else {
            return Err(Error::not_found(instance));
        };
        let record = InstanceRecord {
            name: name.to_string(),
            input: input.to_string(),
            status: log.status(),
            created_at_ms,
            updated_at_ms: now_ms(),
        };
        let snapshot = InstanceSnapshot {
            instance_id: instance.to_string(),
            name: record.name.clone(),
            status: record.status.clone(),
            input: record.input.clone(),
            created_at_ms,
            updated_at_ms: record.updated_at_ms,
        };
        self.instances
            .lock()
            .await
            .entry(instance.to_string())
            .or_insert(record);
        Ok(snapshot)
    }

    /// Forcibly end a non-terminal instance. In-flight activities keep
    /// running; their completions are discarded.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `InvalidState` if the instance has
    /// already reached a terminal state.
    pub async fn terminate(&self, instance: &str, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let lock = self.instance_lock(instance).await;
        let _guard = lock.lock().await;

        let log = HistoryLog::from_events(self.read_history(instance).await?)?;
        if log.is_empty() {
            return Err(Error::not_found(instance));
        }
        if log.is_terminal() {
            return Err(Error::invalid_state(format!(
                "instance {instance} is already {}",
                log.status().name()
            )));
        }
        self.append_history(instance, vec![Event::OrchestratorTerminated { reason: reason.clone() }])
            .await?;
        info!(instance, reason = %reason, "orchestration terminated");
        self.set_status(instance, OrchestrationStatus::Terminated { reason }).await;
        Ok(())
    }

    /// Poll until the instance reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_orchestration(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> std::result::Result<InstanceSnapshot, WaitError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snap = self.get_status(instance).await?;
            if snap.status.is_terminal() {
                return Ok(snap);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(self.options.wait_poll_interval).await;
        }
    }

    /// Full recorded history, for diagnostics.
    pub async fn get_history(&self, instance: &str) -> Result<Vec<Event>> {
        let history = self.read_history(instance).await?;
        if history.is_empty() {
            return Err(Error::not_found(instance));
        }
        Ok(history)
    }

    /// Ids of every instance in the store, sorted.
    pub async fn list_instances(&self) -> Result<Vec<String>> {
        let mut ids = self.history_store.list_instances().await?;
        ids.sort();
        Ok(ids)
    }
}

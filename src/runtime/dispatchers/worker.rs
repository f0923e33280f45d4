//! Worker (activity) dispatcher implementation for Runtime
//!
//! - `schedule` is fire-and-forget: it enqueues and returns
//! - N workers share the queue; each runs one activity at a time
//! - every outcome goes back through `report_completion`

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::super::Runtime;
use crate::{Error, Event, Result};

/// One activity execution request, in flight until its terminal event is
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub instance: String,
    pub task_id: u64,
    pub name: String,
    pub input: String,
}

impl Runtime {
    /// Enqueue `task` for the worker pool and return immediately.
    pub fn schedule(&self, task: ActivityTask) {
        debug!(instance = %task.instance, task_id = task.task_id, activity = %task.name, "activity scheduled");
        if let Err(mpsc::error::SendError(task)) = self.worker_tx.send(task) {
            warn!(instance = %task.instance, task_id = task.task_id, "worker queue closed; task dropped");
        }
    }

    /// Start N concurrent workers for executing activities.
    pub(in crate::runtime) fn start_work_dispatcher(
        self: Arc<Self>,
        rx: mpsc::UnboundedReceiver<ActivityTask>,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        (0..self.options.worker_concurrency.max(1))
            .map(|worker_idx| {
                let rt = self.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else {
                            debug!(worker_idx, "worker queue closed");
                            break;
                        };
                        rt.execute_task(task).await;
                    }
                })
            })
            .collect()
    }

    async fn execute_task(&self, task: ActivityTask) {
        match self.read_history(&task.instance).await {
            Ok(hist) if hist.iter().any(Event::is_instance_terminal) => {
                debug!(instance = %task.instance, task_id = task.task_id, "instance is terminal, skipping activity");
                return;
            }
            Ok(hist)
                if hist.iter().any(|e| {
                    matches!(e, Event::TaskCompleted { task_id, .. } | Event::TaskFailed { task_id, .. }
                        if *task_id == task.task_id)
                }) =>
            {
                debug!(instance = %task.instance, task_id = task.task_id, "task already completed, skipping");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                // The task stays pending in history and is redispatched on recovery.
                error!(instance = %task.instance, task_id = task.task_id, error = %e, "cannot read history for task");
                return;
            }
        }

        let outcome = self.run_activity(&task).await;
        match self.report_completion(&task.instance, task.task_id, outcome).await {
            Ok(true) => {}
            Ok(false) => debug!(instance = %task.instance, task_id = task.task_id, "completion discarded"),
            Err(e) => {
                error!(instance = %task.instance, task_id = task.task_id, error = %e, "failed to record completion")
            }
        }
    }

    /// Run the handler, retrying panics per `RuntimeOptions::activity_retry`.
    /// Errors returned by the activity itself are final.
    async fn run_activity(&self, task: &ActivityTask) -> std::result::Result<String, String> {
        let Some(handler) = self.activity_registry.get(&task.name) else {
            warn!(instance = %task.instance, activity = %task.name, "activity is not registered");
            return Err(format!("unregistered:{}", task.name));
        };
        let policy = &self.options.activity_retry;
        let mut attempt = 1;
        loop {
            let h = handler.clone();
            let input = task.input.clone();
            match tokio::spawn(async move { h.invoke(input).await }).await {
                Ok(outcome) => return outcome,
                Err(join_err) => {
                    let msg = if join_err.is_panic() {
                        super::super::panic_message(join_err.into_panic().as_ref())
                    } else {
                        "activity task cancelled".to_string()
                    };
                    if attempt >= policy.max_attempts {
                        error!(
                            instance = %task.instance,
                            task_id = task.task_id,
                            activity = %task.name,
                            attempt,
                            "activity failed after retries"
                        );
                        return Err(format!("activity panicked after {attempt} attempt(s): {msg}"));
                    }
                    warn!(
                        instance = %task.instance,
                        task_id = task.task_id,
                        activity = %task.name,
                        attempt,
                        panic = %msg,
                        "activity panicked, retrying"
                    );
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Record the terminal event for `task_id` and queue a replay pass.
    ///
    /// Returns `Ok(false)` when the report changed nothing: the task already
    /// had a terminal event, or the instance has ended.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown instances, `OutOfOrder` when `task_id` was never
    /// scheduled. A store failure is returned after the instance has been
    /// failed with it.
    pub async fn report_completion(
        &self,
        instance: &str,
        task_id: u64,
        outcome: std::result::Result<String, String>,
    ) -> Result<bool> {
        let lock = self.instance_lock(instance).await;
        let _guard = lock.lock().await;

        let history = self.read_history(instance).await?;
        if history.is_empty() {
            return Err(Error::not_found(instance));
        }
        if history.iter().any(Event::is_instance_terminal) {
            debug!(instance, task_id, "instance is terminal, discarding completion");
            return Ok(false);
        }

        let event = match outcome {
            Ok(result) => Event::TaskCompleted { task_id, result },
            Err(error) => Event::TaskFailed { task_id, error },
        };
        match self.append_history(instance, vec![event]).await {
            Ok(0) => {
                debug!(instance, task_id, "duplicate completion ignored");
                Ok(false)
            }
            Ok(_) => {
                self.enqueue_pass(instance);
                Ok(true)
            }
            Err(e @ Error::Provider(_)) => {
                // A completion that cannot be stored ends the instance.
                error!(instance, task_id, error = %e, "cannot record completion, failing instance");
                self.fail_instance(instance, e.clone()).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

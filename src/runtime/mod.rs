//! In-process host: instance manager, replay executor and activity dispatcher.
//!
//! The runtime owns two queues. The orchestrator queue carries instance ids
//! that need a replay pass; the worker queue carries `ActivityTask`s. Every
//! history write for an instance happens under that instance's lock, which
//! is the only consistency mechanism the append-only log needs.
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::history::HistoryLog;
use crate::providers::HistoryStore;
use crate::{Event, Result};

pub mod dispatchers;
mod instances;
pub mod registry;
pub mod replay_engine;
mod status;

pub use dispatchers::ActivityTask;
pub use registry::{
    ActivityHandler, ActivityRegistry, ActivityRegistryBuilder, FnActivity, FnOrchestration, OrchestrationHandler,
    OrchestrationRegistry, OrchestrationRegistryBuilder,
};
pub use status::{InstanceSnapshot, OrchestrationStatus, WaitError};

/// Retry schedule for activities whose worker panicked.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total executions, including the first. 1 disables retries.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.backoff_multiplier.powi(exp);
        if !nanos.is_finite() || nanos >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

/// Configuration options for the Runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Number of activity workers pulling from the worker queue.
    /// Default: 4
    pub worker_concurrency: usize,
    pub activity_retry: RetryPolicy,
    /// Extra attempts for provider calls that fail with a retryable
    /// `ProviderError`. Backoff is 10ms·2^n.
    /// Default: 3
    pub store_retry_attempts: u32,
    /// Poll interval used by `wait_for_orchestration`.
    /// Default: 10ms
    pub wait_poll_interval: Duration,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            activity_retry: RetryPolicy::default(),
            store_retry_attempts: 3,
            wait_poll_interval: Duration::from_millis(10),
            log_level: "info".to_string(),
        }
    }
}

/// Arena entry for one instance. Rebuilt from the log after a restart.
#[derive(Debug, Clone)]
struct InstanceRecord {
    name: String,
    input: String,
    status: OrchestrationStatus,
    created_at_ms: u64,
    updated_at_ms: u64,
}

/// In-process runtime that replays orchestrations, executes activities and
/// persists history via a `HistoryStore`.
pub struct Runtime {
    joins: Mutex<Vec<JoinHandle<()>>>,
    history_store: Arc<dyn HistoryStore>,
    orchestration_registry: OrchestrationRegistry,
    activity_registry: Arc<ActivityRegistry>,
    instances: Mutex<HashMap<String, InstanceRecord>>,
    instance_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    orchestrator_tx: mpsc::UnboundedSender<String>,
    worker_tx: mpsc::UnboundedSender<ActivityTask>,
    options: RuntimeOptions,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Runtime {
    /// Start a new runtime with a custom `HistoryStore` implementation.
    pub async fn start_with_store(
        history_store: Arc<dyn HistoryStore>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
    ) -> Result<Arc<Self>> {
        Self::start_with_options(
            history_store,
            activity_registry,
            orchestration_registry,
            RuntimeOptions::default(),
        )
        .await
    }

    /// Start a new runtime with custom options.
    ///
    /// Non-terminal instances already in the store are recovered: their
    /// unfinished tasks are dispatched again and a replay pass is queued.
    pub async fn start_with_options(
        history_store: Arc<dyn HistoryStore>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
        options: RuntimeOptions,
    ) -> Result<Arc<Self>> {
        // Install a default subscriber if none set (ok to call many times)
        crate::logging::init_tracing(&options.log_level);

        let (orchestrator_tx, orchestrator_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let runtime = Arc::new(Self {
            joins: Mutex::new(Vec::new()),
            history_store,
            orchestration_registry,
            activity_registry,
            instances: Mutex::new(HashMap::new()),
            instance_locks: Mutex::new(HashMap::new()),
            orchestrator_tx,
            worker_tx,
            options,
        });

        let handle = runtime.clone().start_orchestration_dispatcher(orchestrator_rx);
        runtime.joins.lock().await.push(handle);

        let work_handles = runtime.clone().start_work_dispatcher(worker_rx);
        runtime.joins.lock().await.extend(work_handles);

        info!(
            orchestrations = runtime.orchestration_registry.count(),
            activities = runtime.activity_registry.count(),
            workers = runtime.options.worker_concurrency,
            "runtime started"
        );
        runtime.recover().await?;
        Ok(runtime)
    }

    /// Abort the dispatchers. In-flight activity results are lost; they are
    /// dispatched again by the next runtime started on the same store.
    pub async fn shutdown(self: Arc<Self>) {
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
        info!("runtime shut down");
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    async fn recover(self: &Arc<Self>) -> Result<()> {
        let mut ids = self.history_store.list_instances().await?;
        ids.sort();
        for id in ids {
            let log = HistoryLog::from_events(self.read_history(&id).await?)?;
            let Some((name, input, created_at_ms)) = log.started() else {
                continue;
            };
            self.instances.lock().await.insert(
                id.clone(),
                InstanceRecord {
                    name: name.to_string(),
                    input: input.to_string(),
                    status: log.status(),
                    created_at_ms,
                    updated_at_ms: now_ms(),
                },
            );
            if log.is_terminal() {
                continue;
            }
            let pending = log.pending_tasks();
            info!(instance = %id, orchestration = %name, pending = pending.len(), "recovering instance");
            for t in pending {
                self.schedule(ActivityTask {
                    instance: id.clone(),
                    task_id: t.task_id,
                    name: t.name,
                    input: t.input,
                });
            }
            self.enqueue_pass(&id);
        }
        Ok(())
    }

    /// Per-instance single-writer lock.
    pub(crate) async fn instance_lock(&self, instance: &str) -> Arc<Mutex<()>> {
        self.instance_locks
            .lock()
            .await
            .entry(instance.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn enqueue_pass(&self, instance: &str) {
        if self.orchestrator_tx.send(instance.to_string()).is_err() {
            warn!(instance, "orchestrator queue closed; replay pass dropped");
        }
    }

    fn should_retry(&self, err: &crate::Error, attempt: u32) -> bool {
        err.is_retryable() && attempt < self.options.store_retry_attempts
    }

    async fn backoff(&self, operation: &str, instance: &str, attempt: u32, err: &crate::Error) {
        let delay = Duration::from_millis(10 * 2u64.pow(attempt.min(16)));
        warn!(operation, instance, attempt, error = %err, "provider error, retrying");
        tokio::time::sleep(delay).await;
    }

    pub(crate) async fn read_history(&self, instance: &str) -> Result<Vec<Event>> {
        let mut attempt = 0;
        loop {
            match self.history_store.read(instance).await {
                Err(e) if self.should_retry(&e, attempt) => {
                    self.backoff("read", instance, attempt, &e).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub(crate) async fn append_history(&self, instance: &str, events: Vec<Event>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut attempt = 0;
        loop {
            match self.history_store.append(instance, events.clone()).await {
                Err(e) if self.should_retry(&e, attempt) => {
                    self.backoff("append", instance, attempt, &e).await;
                    attempt += 1;
                }
                Ok(n) => {
                    debug!(instance, appended = n, "history appended");
                    return Ok(n);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Update the arena after a transition recorded in the log.
    pub(crate) async fn set_status(&self, instance: &str, status: OrchestrationStatus) {
        let mut arena = self.instances.lock().await;
        match arena.get_mut(instance) {
            Some(rec) => {
                rec.status = status;
                rec.updated_at_ms = now_ms();
            }
            None => debug!(instance, "status update for instance missing from arena"),
        }
    }
}

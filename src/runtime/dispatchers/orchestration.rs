//! Orchestration dispatcher: one replay pass per queued instance id.
//!
//! Passes for different instances run concurrently; passes for the same
//! instance serialize on its lock, so each one sees everything the previous
//! one appended.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::super::replay_engine::{ReplayEngine, TurnResult};
use super::super::{OrchestrationStatus, Runtime};
use super::ActivityTask;
use crate::history::HistoryLog;
use crate::{Action, Error, Event, Result};

impl Runtime {
    pub(in crate::runtime) fn start_orchestration_dispatcher(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(instance) = rx.recv().await {
                let rt = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = rt.run_pass(&instance).await {
                        error!(instance = %instance, error = %e, "replay pass failed");
                    }
                });
            }
            debug!("orchestrator queue closed");
        })
    }

    /// Load history, replay, persist the delta, then dispatch new tasks.
    async fn run_pass(self: &Arc<Self>, instance: &str) -> Result<()> {
        let lock = self.instance_lock(instance).await;
        let _guard = lock.lock().await;

        let log = HistoryLog::from_events(self.read_history(instance).await?)?;
        let (name, input) = match log.started() {
            Some((name, input, _)) => (name.to_string(), input.to_string()),
            None => return Err(Error::not_found(instance)),
        };
        if log.is_terminal() {
            debug!(instance, "instance is terminal, skipping pass");
            return Ok(());
        }

        let Some(handler) = self.orchestration_registry.get(&name) else {
            warn!(instance, orchestration = %name, "no orchestration registered under this name");
            return self.fail_instance(instance, Error::UnknownOrchestrator { name }).await;
        };

        if log.status() == OrchestrationStatus::Pending {
            self.set_status(instance, OrchestrationStatus::Running).await;
        }

        let mut engine = ReplayEngine::new(instance, log.into_events());
        let result = engine.execute_orchestration(handler, input);
        let (history_delta, actions) = engine.into_parts();

        // A delta the store refused, even after retries, ends the instance.
        if let Err(e) = self.append_history(instance, history_delta).await {
            error!(instance, error = %e, "cannot persist replay pass, failing instance");
            return self.fail_instance(instance, e).await;
        }

        for action in actions {
            match action {
                Action::CallActivity { task_id, name, input } => self.schedule(ActivityTask {
                    instance: instance.to_string(),
                    task_id,
                    name,
                    input,
                }),
            }
        }

        let status = match result {
            TurnResult::Continue => OrchestrationStatus::Running,
            TurnResult::Completed(output) => {
                info!(instance, orchestration = %name, "orchestration completed");
                OrchestrationStatus::Completed { output }
            }
            TurnResult::Failed(error) => {
                warn!(instance, orchestration = %name, error = %error, "orchestration failed");
                OrchestrationStatus::Failed { error }
            }
        };
        self.set_status(instance, status).await;
        Ok(())
    }

    /// Record a terminal failure decided outside of orchestrator code.
    /// Caller holds the instance lock.
    pub(in crate::runtime) async fn fail_instance(&self, instance: &str, error: Error) -> Result<()> {
        self.append_history(instance, vec![Event::OrchestratorFailed { error: error.clone() }])
            .await?;
        self.set_status(instance, OrchestrationStatus::Failed { error }).await;
        Ok(())
    }
}

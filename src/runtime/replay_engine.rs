use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::OrchestrationHandler;
use crate::{run_turn, Action, Error, Event};

/// Result of executing an orchestration turn
#[derive(Debug)]
pub enum TurnResult {
    /// Suspended on at least one unresolved activity
    Continue,
    /// Orchestration completed with output
    Completed(String),
    /// Orchestration failed; the matching `OrchestratorFailed` is in the delta
    Failed(Error),
}

/// Replays history and executes one deterministic orchestration evaluation
pub struct ReplayEngine {
    instance: String,
    /// History events generated during this run
    history_delta: Vec<Event>,
    /// Actions to dispatch after persistence
    pending_actions: Vec<Action>,
    /// History at the start of the run
    baseline_history: Vec<Event>,
}

impl ReplayEngine {
    pub fn new(instance: impl Into<String>, baseline_history: Vec<Event>) -> Self {
        Self {
            instance: instance.into(),
            history_delta: Vec::new(),
            pending_actions: Vec::new(),
            baseline_history,
        }
    }

    /// Run one pass of `handler` over the baseline history.
    ///
    /// Panics in orchestrator code fail the instance like a returned error.
    /// A replay divergence fails it with `NonDeterminism` and records no
    /// scheduling decisions from the pass.
    pub fn execute_orchestration(&mut self, handler: Arc<dyn OrchestrationHandler>, input: String) -> TurnResult {
        let span = tracing::debug_span!("replay", instance = %self.instance, events = self.baseline_history.len());
        let _entered = span.enter();

        let history = self.baseline_history.clone();
        let run_result = catch_unwind(AssertUnwindSafe(|| run_turn(history, move |ctx| handler.invoke(ctx, input))));

        let turn = match run_result {
            Ok(turn) => turn,
            Err(payload) => {
                let msg = super::panic_message(payload.as_ref());
                warn!(instance = %self.instance, panic = %msg, "orchestration panicked");
                return self.fail(Error::application(format!("orchestration panicked: {msg}")));
            }
        };

        if let Some(err) = turn.nondeterminism {
            warn!(instance = %self.instance, error = %err, "replay diverged from history");
            return self.fail(err);
        }

        debug!(
            instance = %self.instance,
            scheduled = turn.actions.len(),
            finished = turn.output.is_some(),
            "replay pass done"
        );
        self.history_delta.extend(turn.history_delta);
        self.pending_actions.extend(turn.actions);

        match turn.output {
            None => TurnResult::Continue,
            Some(Ok(output)) => {
                self.history_delta.push(Event::OrchestratorCompleted { output: output.clone() });
                TurnResult::Completed(output)
            }
            Some(Err(err)) => self.fail(err),
        }
    }

    fn fail(&mut self, err: Error) -> TurnResult {
        self.history_delta.push(Event::OrchestratorFailed { error: err.clone() });
        TurnResult::Failed(err)
    }

    pub fn history_delta(&self) -> &[Event] {
        &self.history_delta
    }

    pub fn pending_actions(&self) -> &[Action] {
        &self.pending_actions
    }

    pub fn into_parts(self) -> (Vec<Event>, Vec<Action>) {
        (self.history_delta, self.pending_actions)
    }
}

//! Deterministic replay-based orchestration runtime.
//!
//! Orchestrations are ordinary `async` Rust functions. Each time new history
//! arrives the runtime replays the function from its first statement against
//! the append-only `Event` log: activity calls already recorded resolve
//! immediately from history, new calls are recorded as `TaskScheduled` and
//! dispatched to a worker pool, and the first unresolved await suspends the
//! pass. Nothing is kept in memory between passes.
//!
//! - Data model: `Event`, `Action`
//! - Replay driver: `run_turn` and `OrchestrationContext`
//! - Aggregation: `DurableFuture`, `JoinFuture`, `FanInFuture`
//! - Host: `runtime::Runtime` (instance manager, executor, dispatcher) and
//!   `Client` (trigger boundary)
//! - Storage: `providers::HistoryStore` with in-memory and JSONL filesystem stores
//!
//! ```rust
//! use durable_tasks::{run_turn, Action, Event};
//!
//! let history = vec![Event::OrchestratorStarted {
//!     name: "Greet".into(),
//!     input: String::new(),
//!     created_at_ms: 0,
//! }];
//! let turn = run_turn(history, |ctx| async move {
//!     ctx.schedule_activity("Capitalize", "tokyo").await
//! });
//! assert!(turn.output.is_none());
//! assert!(matches!(&turn.actions[0], Action::CallActivity { task_id: 1, .. }));
//! ```
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};

pub mod client;
pub mod error;
pub mod futures;
pub mod history;
pub mod logging;
pub mod providers;
pub mod runtime;
pub mod samples;

pub use client::{CheckStatusResponse, Client};
pub use error::{ActivityError, Error, Result};
pub use crate::futures::{DurableFuture, FanInFuture, JoinFuture, JoinPolicy};
pub use history::{AppendOutcome, HistoryLog};
pub use runtime::{
    ActivityRegistry, InstanceSnapshot, OrchestrationRegistry, OrchestrationStatus, RetryPolicy, Runtime,
    RuntimeOptions, WaitError,
};

pub(crate) mod codec {
    use serde::{de::DeserializeOwned, Serialize};
    use serde_json::Value;

    use crate::Error;

    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, Error>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, Error>;
    }

    /// JSON payloads; a bare JSON string is stored as its raw text so string
    /// activities see `Tokyo` rather than `"Tokyo"`.
    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, Error> {
            match serde_json::to_value(v).map_err(Error::codec)? {
                Value::String(s) => Ok(s),
                val => serde_json::to_string(&val).map_err(Error::codec),
            }
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, Error> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => serde_json::from_value(Value::String(s.to_string())).map_err(Error::codec),
            }
        }
    }
}

/// Append-only history entry. An event's sequence number is its position in
/// the log; task ids pair completions with the `TaskScheduled` they answer.
///
/// Persisted as externally tagged JSON, e.g.
/// `{"TaskScheduled":{"task_id":1,"name":"Capitalize","input":"Tokyo"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Always the first event of an instance.
    OrchestratorStarted { name: String, input: String, created_at_ms: u64 },
    /// Task ids are 1-based and follow the order in which orchestrator code
    /// requested the activities.
    TaskScheduled { task_id: u64, name: String, input: String },
    TaskCompleted { task_id: u64, result: String },
    TaskFailed { task_id: u64, error: String },
    OrchestratorCompleted { output: String },
    OrchestratorFailed { error: Error },
    OrchestratorTerminated { reason: String },
}

impl Event {
    /// Task id for task-scoped events.
    pub fn task_id(&self) -> Option<u64> {
        match self {
            Event::TaskScheduled { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    pub fn is_instance_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestratorCompleted { .. }
                | Event::OrchestratorFailed { .. }
                | Event::OrchestratorTerminated { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrchestratorStarted { .. } => "OrchestratorStarted",
            Event::TaskScheduled { .. } => "TaskScheduled",
            Event::TaskCompleted { .. } => "TaskCompleted",
            Event::TaskFailed { .. } => "TaskFailed",
            Event::OrchestratorCompleted { .. } => "OrchestratorCompleted",
            Event::OrchestratorFailed { .. } => "OrchestratorFailed",
            Event::OrchestratorTerminated { .. } => "OrchestratorTerminated",
        }
    }
}

/// Decisions produced by a replay pass. The host materializes them after the
/// matching events are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CallActivity { task_id: u64, name: String, input: String },
}

#[derive(Debug, Clone)]
struct RecordedTask {
    task_id: u64,
    name: String,
    input: String,
}

/// How far the current pass has walked through the recorded task schedule.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ReplayCursor {
    position: usize,
}

impl ReplayCursor {
    fn advance(&mut self) -> usize {
        let at = self.position;
        self.position += 1;
        at
    }
}

#[derive(Debug)]
struct CtxInner {
    history: Vec<Event>,
    recorded: Vec<RecordedTask>,
    outcomes: HashMap<u64, Result<String, String>>,
    cursor: ReplayCursor,
    history_delta: Vec<Event>,
    actions: Vec<Action>,
    nondeterminism: Option<Error>,
}

impl CtxInner {
    fn new(history: Vec<Event>) -> Self {
        let recorded = history
            .iter()
            .filter_map(|e| match e {
                Event::TaskScheduled { task_id, name, input } => Some(RecordedTask {
                    task_id: *task_id,
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect();
        let mut outcomes = HashMap::new();
        for e in &history {
            match e {
                Event::TaskCompleted { task_id, result } => {
                    outcomes.entry(*task_id).or_insert_with(|| Ok(result.clone()));
                }
                Event::TaskFailed { task_id, error } => {
                    outcomes.entry(*task_id).or_insert_with(|| Err(error.clone()));
                }
                _ => {}
            }
        }
        Self {
            history,
            recorded,
            outcomes,
            cursor: ReplayCursor::default(),
            history_delta: Vec::new(),
            actions: Vec::new(),
            nondeterminism: None,
        }
    }

    fn outcome_of(&self, task_id: u64) -> Option<Result<String, String>> {
        self.outcomes.get(&task_id).cloned()
    }

    fn flag_nondeterminism(&mut self, err: Error) {
        // Keep the first divergence; later ones are consequences of it.
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(err);
        }
    }
}

/// Handle passed to orchestrator code. Cheap to clone; every clone refers to
/// the same replay pass. Deliberately `!Send`: a pass runs on one logical
/// thread from start to suspension.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Rc<RefCell<CtxInner>>,
}

impl OrchestrationContext {
    pub fn new(history: Vec<Event>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CtxInner::new(history))),
        }
    }

    /// Orchestration type name from `OrchestratorStarted`, if present.
    pub fn orchestration_name(&self) -> Option<String> {
        self.inner.borrow().history.iter().find_map(|e| match e {
            Event::OrchestratorStarted { name, .. } => Some(name.clone()),
            _ => None,
        })
    }

    /// True while orchestrator code is re-walking decisions that are already
    /// in history. Used to keep logs from repeating on every pass.
    pub fn is_replaying(&self) -> bool {
        let inner = self.inner.borrow();
        inner.cursor.position < inner.recorded.len()
    }

    /// Request an activity. The returned future resolves from history when
    /// the task's completion is recorded, and stays pending otherwise.
    ///
    /// Calls are matched to history by position: the n-th call in a pass
    /// must request the same name and input as the n-th `TaskScheduled`.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        let name: String = name.into();
        let input: String = input.into();
        let mut inner = self.inner.borrow_mut();
        if inner.nondeterminism.is_some() {
            return DurableFuture::poisoned();
        }

        let position = inner.cursor.advance();
        let task_id = position as u64 + 1;
        let recorded = inner.recorded.get(position).cloned();
        match recorded {
            Some(rec) if rec.task_id == task_id && rec.name == name && rec.input == input => {}
            Some(rec) => {
                inner.flag_nondeterminism(Error::nondeterminism(format!(
                    "call #{task_id} requested activity '{name}' with input '{input}', \
                     but history recorded task {} as '{}' with input '{}'",
                    rec.task_id, rec.name, rec.input
                )));
                return DurableFuture::poisoned();
            }
            None => {
                inner.history_delta.push(Event::TaskScheduled {
                    task_id,
                    name: name.clone(),
                    input: input.clone(),
                });
                inner.actions.push(Action::CallActivity {
                    task_id,
                    name: name.clone(),
                    input,
                });
            }
        }
        drop(inner);
        DurableFuture::live(task_id, name, self.clone())
    }

    /// Typed variant; the input is JSON-encoded (bare strings stay raw).
    pub fn schedule_activity_typed<In: Serialize>(&self, name: impl Into<String>, input: &In) -> DurableFuture {
        use crate::codec::Codec;
        match crate::codec::Json::encode(input) {
            Ok(payload) => self.schedule_activity(name, payload),
            Err(e) => DurableFuture::failed(e),
        }
    }

    /// Wait for every future; results come back in scheduling order.
    pub fn join(&self, futures: Vec<DurableFuture>) -> JoinFuture {
        JoinFuture::new(futures)
    }

    /// Fan-in with an explicit failure policy.
    pub fn fan_in(&self, futures: Vec<DurableFuture>, policy: JoinPolicy) -> FanInFuture {
        FanInFuture::new(futures, policy)
    }

    pub(crate) fn task_outcome(&self, task_id: u64) -> Option<Result<String, String>> {
        self.inner.borrow().outcome_of(task_id)
    }

    fn finish(&self) -> (Vec<Event>, Vec<Action>, Option<Error>, usize, usize) {
        let mut inner = self.inner.borrow_mut();
        (
            std::mem::take(&mut inner.history_delta),
            std::mem::take(&mut inner.actions),
            inner.nondeterminism.take(),
            inner.cursor.position,
            inner.recorded.len(),
        )
    }
}

/// Result of one replay pass.
#[derive(Debug)]
pub struct Turn<O> {
    /// `TaskScheduled` events for calls first reached in this pass.
    pub history_delta: Vec<Event>,
    /// Dispatch requests matching `history_delta`.
    pub actions: Vec<Action>,
    /// Set when orchestrator code returned.
    pub output: Option<O>,
    /// Set when replay diverged from history. `history_delta`, `actions`
    /// and `output` are then empty.
    pub nondeterminism: Option<Error>,
}

impl<O> Turn<O> {
    pub fn is_suspended(&self) -> bool {
        self.output.is_none() && self.nondeterminism.is_none()
    }
}

fn poll_once<F: Future>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let mut cx = Context::from_waker(::futures::task::noop_waker_ref());
    fut.poll(&mut cx)
}

/// Replay `orchestrator` once against `history`.
///
/// The orchestrator is polled a single time: every await that can be
/// answered from history resolves synchronously, so a `Pending` result means
/// the code is suspended on a task whose completion has not been recorded.
pub fn run_turn<O, F>(history: Vec<Event>, orchestrator: impl FnOnce(OrchestrationContext) -> F) -> Turn<O>
where
    F: Future<Output = O>,
{
    let ctx = OrchestrationContext::new(history);
    let fut = orchestrator(ctx.clone());
    let mut fut = std::pin::pin!(fut);
    let polled = poll_once(fut.as_mut());
    let (history_delta, actions, nondeterminism, reached, recorded) = ctx.finish();

    if let Some(err) = nondeterminism {
        return Turn {
            history_delta: Vec::new(),
            actions: Vec::new(),
            output: None,
            nondeterminism: Some(err),
        };
    }

    match polled {
        Poll::Ready(_) if reached < recorded => Turn {
            history_delta: Vec::new(),
            actions: Vec::new(),
            output: None,
            nondeterminism: Some(Error::nondeterminism(format!(
                "orchestration returned after {reached} activity call(s), but history recorded {recorded}"
            ))),
        },
        Poll::Ready(out) => Turn {
            history_delta,
            actions,
            output: Some(out),
            nondeterminism: None,
        },
        Poll::Pending => Turn {
            history_delta,
            actions,
            output: None,
            nondeterminism: None,
        },
    }
}

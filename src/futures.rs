//! Futures handed to orchestrator code, and the fan-in aggregators built on them.
//!
//! None of these register wakers: the replay engine polls an orchestration
//! exactly once per pass, and every value they can produce is already in
//! history at that moment.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, Json};
use crate::{ActivityError, Error, OrchestrationContext};

/// Future for one scheduled activity. Resolves to the recorded result, or to
/// `Error::Activity` when history holds a `TaskFailed` for the task.
pub struct DurableFuture {
    state: State,
}

enum State {
    Live {
        task_id: u64,
        name: String,
        ctx: OrchestrationContext,
    },
    /// Replay diverged; the pass is about to be failed by the engine.
    Poisoned,
    /// Failed before anything was scheduled (e.g. input encoding).
    Failed(Option<Error>),
}

impl DurableFuture {
    pub(crate) fn live(task_id: u64, name: String, ctx: OrchestrationContext) -> Self {
        Self {
            state: State::Live { task_id, name, ctx },
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self { state: State::Poisoned }
    }

    pub(crate) fn failed(err: Error) -> Self {
        Self {
            state: State::Failed(Some(err)),
        }
    }

    /// Task id this future is correlated with, if a task was scheduled.
    pub fn task_id(&self) -> Option<u64> {
        match &self.state {
            State::Live { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    /// Await the result decoded from JSON.
    pub fn into_typed<Out: serde::de::DeserializeOwned>(self) -> impl Future<Output = Result<Out, Error>> {
        async move {
            let raw = self.await?;
            Json::decode::<Out>(&raw)
        }
    }
}

impl Future for DurableFuture {
    type Output = Result<String, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Live { task_id, name, ctx } => match ctx.task_outcome(*task_id) {
                Some(Ok(result)) => Poll::Ready(Ok(result)),
                Some(Err(message)) => Poll::Ready(Err(ActivityError {
                    task_id: *task_id,
                    name: name.clone(),
                    message,
                }
                .into())),
                None => Poll::Pending,
            },
            State::Poisoned => Poll::Pending,
            State::Failed(err) => match err.take() {
                Some(e) => Poll::Ready(Err(e)),
                None => Poll::Pending,
            },
        }
    }
}

/// What a fan-in does when one branch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinPolicy {
    /// Resolve with the first failure (in scheduling order) as soon as any
    /// branch has failed, without waiting for the rest.
    #[default]
    FailFast,
    /// Wait for every branch, then report the first failure in scheduling order.
    WaitForAll,
}

type Slot = Option<Result<String, Error>>;

/// Poll every unresolved branch once. Returns true when all have resolved.
fn poll_branches(branches: &mut [DurableFuture], slots: &mut [Slot], cx: &mut Context<'_>) -> bool {
    let mut all_done = true;
    for (fut, slot) in branches.iter_mut().zip(slots.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        match Pin::new(fut).poll(cx) {
            Poll::Ready(v) => *slot = Some(v),
            Poll::Pending => all_done = false,
        }
    }
    all_done
}

fn first_failure(slots: &mut [Slot]) -> Option<Error> {
    let idx = slots.iter().position(|s| matches!(s, Some(Err(_))))?;
    match slots[idx].take() {
        Some(Err(e)) => Some(e),
        _ => None,
    }
}

/// Wait-for-all join; results in scheduling order regardless of the order
/// in which completions were recorded.
pub struct JoinFuture {
    branches: Vec<DurableFuture>,
    slots: Vec<Slot>,
}

impl JoinFuture {
    pub(crate) fn new(branches: Vec<DurableFuture>) -> Self {
        let slots = branches.iter().map(|_| None).collect();
        Self { branches, slots }
    }
}

impl Future for JoinFuture {
    type Output = Vec<Result<String, Error>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !poll_branches(&mut this.branches, &mut this.slots, cx) {
            return Poll::Pending;
        }
        Poll::Ready(this.slots.iter_mut().filter_map(Option::take).collect())
    }
}

/// Fan-in under a `JoinPolicy`, yielding all values in scheduling order.
pub struct FanInFuture {
    branches: Vec<DurableFuture>,
    slots: Vec<Slot>,
    policy: JoinPolicy,
}

impl FanInFuture {
    pub(crate) fn new(branches: Vec<DurableFuture>, policy: JoinPolicy) -> Self {
        let slots = branches.iter().map(|_| None).collect();
        Self { branches, slots, policy }
    }
}

impl Future for FanInFuture {
    type Output = Result<Vec<String>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let all_done = poll_branches(&mut this.branches, &mut this.slots, cx);

        if this.policy == JoinPolicy::FailFast || all_done {
            if let Some(err) = first_failure(&mut this.slots) {
                return Poll::Ready(Err(err));
            }
        }
        if !all_done {
            return Poll::Pending;
        }
        let values = this
            .slots
            .iter_mut()
            .filter_map(|s| match s.take() {
                Some(Ok(v)) => Some(v),
                _ => None,
            })
            .collect();
        Poll::Ready(Ok(values))
    }
}

//! Append-only history log for a single orchestration instance.
//!
//! `HistoryLog` is the in-memory form every provider loads and validates
//! against before persisting; the invariants live here so that all stores
//! enforce them the same way.

use std::collections::HashMap;

use crate::runtime::OrchestrationStatus;
use crate::{Error, Event, Result};

/// What `HistoryLog::append` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A second terminal event for a task (or for the instance). Not stored.
    Duplicate,
}

/// A scheduled activity whose completion has not been recorded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub task_id: u64,
    pub name: String,
    pub input: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Scheduled,
    Terminal,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    events: Vec<Event>,
    tasks: HashMap<u64, TaskState>,
    scheduled_count: u64,
    terminal: bool,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events, re-checking every invariant.
    /// Duplicate terminal events in the input are dropped.
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Result<Self> {
        let mut log = Self::new();
        for e in events {
            log.append(e)?;
        }
        Ok(log)
    }

    /// Add `event` to the tail.
    ///
    /// # Errors
    ///
    /// `OutOfOrder` when a completion names a task that was never scheduled;
    /// `InvalidState` when the start event is misplaced, a task id skips
    /// ahead, or a task is scheduled after the instance ended.
    pub fn append(&mut self, event: Event) -> Result<AppendOutcome> {
        match &event {
            Event::OrchestratorStarted { .. } => {
                if !self.events.is_empty() {
                    return Err(Error::invalid_state("OrchestratorStarted must be the first event"));
                }
            }
            _ if self.events.is_empty() => {
                return Err(Error::invalid_state(format!(
                    "{} appended before OrchestratorStarted",
                    event.kind()
                )));
            }
            Event::TaskScheduled { task_id, .. } => {
                if self.terminal {
                    return Err(Error::invalid_state(format!(
                        "task {task_id} scheduled after the instance ended"
                    )));
                }
                if *task_id != self.scheduled_count + 1 {
                    return Err(Error::invalid_state(format!(
                        "expected task id {}, got {task_id}",
                        self.scheduled_count + 1
                    )));
                }
            }
            Event::TaskCompleted { task_id, .. } | Event::TaskFailed { task_id, .. } => {
                match self.tasks.get(task_id) {
                    None => return Err(Error::OutOfOrder { task_id: *task_id }),
                    Some(TaskState::Terminal) => return Ok(AppendOutcome::Duplicate),
                    Some(TaskState::Scheduled) => {}
                }
            }
            Event::OrchestratorCompleted { .. }
            | Event::OrchestratorFailed { .. }
            | Event::OrchestratorTerminated { .. } => {
                if self.terminal {
                    return Ok(AppendOutcome::Duplicate);
                }
            }
        }

        match &event {
            Event::TaskScheduled { task_id, .. } => {
                self.tasks.insert(*task_id, TaskState::Scheduled);
                self.scheduled_count += 1;
            }
            Event::TaskCompleted { task_id, .. } | Event::TaskFailed { task_id, .. } => {
                self.tasks.insert(*task_id, TaskState::Terminal);
            }
            e if e.is_instance_terminal() => self.terminal = true,
            _ => {}
        }
        self.events.push(event);
        Ok(AppendOutcome::Appended)
    }

    /// The full ordered sequence. Restartable: call again for a fresh pass.
    pub fn read_all(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// `(name, input, created_at_ms)` from `OrchestratorStarted`.
    pub fn started(&self) -> Option<(&str, &str, u64)> {
        match self.events.first() {
            Some(Event::OrchestratorStarted {
                name,
                input,
                created_at_ms,
            }) => Some((name.as_str(), input.as_str(), *created_at_ms)),
            _ => None,
        }
    }

    /// Scheduled tasks with no recorded completion, in scheduling order.
    pub fn pending_tasks(&self) -> Vec<PendingTask> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::TaskScheduled { task_id, name, input }
                    if self.tasks.get(task_id) == Some(&TaskState::Scheduled) =>
                {
                    Some(PendingTask {
                        task_id: *task_id,
                        name: name.clone(),
                        input: input.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Status as recorded in the log. An instance with no scheduled work and
    /// no terminal event has not had a replay pass yet.
    pub fn status(&self) -> OrchestrationStatus {
        let terminal = self.events.iter().rev().find_map(|e| match e {
            Event::OrchestratorCompleted { output } => Some(OrchestrationStatus::Completed { output: output.clone() }),
            Event::OrchestratorFailed { error } => Some(OrchestrationStatus::Failed { error: error.clone() }),
            Event::OrchestratorTerminated { reason } => {
                Some(OrchestrationStatus::Terminated { reason: reason.clone() })
            }
            _ => None,
        });
        match terminal {
            Some(s) => s,
            None if self.scheduled_count > 0 => OrchestrationStatus::Running,
            None => OrchestrationStatus::Pending,
        }
    }
}

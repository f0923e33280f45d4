#![allow(dead_code)]

pub mod fault_injection;

use durable_tasks::providers::fs::FsHistoryStore;
use durable_tasks::providers::in_memory::InMemoryHistoryStore;
use durable_tasks::providers::HistoryStore;
use durable_tasks::{samples, Event, Runtime, RuntimeOptions};
use std::sync::Arc as StdArc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

pub async fn wait_for_history<F>(store: StdArc<dyn HistoryStore>, instance: &str, predicate: F, timeout_ms: u64) -> bool
where
    F: Fn(&Vec<Event>) -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let hist = store.read(instance).await.unwrap_or_default();
        if predicate(&hist) {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn count_scheduled(hist: &[Event]) -> usize {
    hist.iter().filter(|e| matches!(e, Event::TaskScheduled { .. })).count()
}

pub fn in_memory_store() -> StdArc<dyn HistoryStore> {
    StdArc::new(InMemoryHistoryStore::default())
}

pub fn fs_store() -> (StdArc<dyn HistoryStore>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let store = StdArc::new(FsHistoryStore::new(td.path(), true)) as StdArc<dyn HistoryStore>;
    (store, td)
}

/// Fast retries so panic-retry tests finish quickly.
pub fn fast_options() -> RuntimeOptions {
    let mut opts = RuntimeOptions::default();
    opts.activity_retry.initial_backoff = Duration::from_millis(1);
    opts.activity_retry.max_backoff = Duration::from_millis(5);
    opts.wait_poll_interval = Duration::from_millis(5);
    opts
}

pub async fn start_samples(store: StdArc<dyn HistoryStore>) -> StdArc<Runtime> {
    Runtime::start_with_options(
        store,
        samples::activity_registry(),
        samples::orchestration_registry(),
        fast_options(),
    )
    .await
    .unwrap()
}

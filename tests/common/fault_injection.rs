//! Store wrappers that inject provider faults.

#![allow(dead_code)]

use async_trait::async_trait;
use durable_tasks::providers::{HistoryStore, ProviderError};
use durable_tasks::{Event, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Fails the next N appends with a `ProviderError`, then delegates.
/// Injected errors are retryable unless `fail_next_appends_permanently` armed them.
pub struct FlakyAppendStore {
    inner: Arc<dyn HistoryStore>,
    fail_next_appends: AtomicU32,
    permanent: AtomicBool,
    injected: AtomicU32,
}

impl FlakyAppendStore {
    pub fn new(inner: Arc<dyn HistoryStore>) -> Self {
        Self {
            inner,
            fail_next_appends: AtomicU32::new(0),
            permanent: AtomicBool::new(false),
            injected: AtomicU32::new(0),
        }
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.permanent.store(false, Ordering::SeqCst);
        self.fail_next_appends.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_appends_permanently(&self, n: u32) {
        self.permanent.store(true, Ordering::SeqCst);
        self.fail_next_appends.store(n, Ordering::SeqCst);
    }

    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for FlakyAppendStore {
    async fn create_instance(&self, instance: &str) -> Result<()> {
        self.inner.create_instance(instance).await
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>> {
        self.inner.read(instance).await
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<usize> {
        let remaining = self.fail_next_appends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_appends.store(remaining - 1, Ordering::SeqCst);
            self.injected.fetch_add(1, Ordering::SeqCst);
            if self.permanent.load(Ordering::SeqCst) {
                return Err(ProviderError::permanent("append", "injected: disk full").into());
            }
            return Err(ProviderError::retryable("append", "injected: store busy").into());
        }
        self.inner.append(instance, new_events).await
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        self.inner.list_instances().await
    }

    async fn remove_instance(&self, instance: &str) -> Result<()> {
        self.inner.remove_instance(instance).await
    }
}

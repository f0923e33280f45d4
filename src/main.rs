//! Demo host: trigger one sample orchestration and wait for its result.
//!
//! ```text
//! durable-tasks [Chain|FanOutFanIn|FOFI] [input-json]
//! ```
//!
//! Set `DURABLE_TASKS_STORE_DIR` to keep history on disk; otherwise it lives
//! in memory for the lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use durable_tasks::providers::fs::FsHistoryStore;
use durable_tasks::providers::in_memory::InMemoryHistoryStore;
use durable_tasks::providers::HistoryStore;
use durable_tasks::{samples, Client, Runtime, RuntimeOptions};

const STORE_DIR_ENV: &str = "DURABLE_TASKS_STORE_DIR";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let trigger = args.next();
    let input = args.next().unwrap_or_default();

    let store: Arc<dyn HistoryStore> = match std::env::var(STORE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Arc::new(FsHistoryStore::new(dir, false)),
        _ => Arc::new(InMemoryHistoryStore::default()),
    };

    let rt = Runtime::start_with_options(
        store,
        samples::activity_registry(),
        samples::orchestration_registry(),
        RuntimeOptions::default(),
    )
    .await?;
    let client = Client::new(rt.clone());

    let handle = client.start_from_trigger(trigger.as_deref(), input).await?;
    println!("{}", serde_json::to_string_pretty(&handle)?);

    let outcome = client.wait_for_completion(&handle.id, Duration::from_secs(30)).await;
    rt.shutdown().await;

    let snapshot = outcome?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

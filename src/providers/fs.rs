use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use super::{HistoryStore, ProviderError};
use crate::history::{AppendOutcome, HistoryLog};
use crate::{Error, Event, Result};

/// Filesystem-backed history store writing one JSONL file per instance.
///
/// Each line is one externally tagged `Event`. Appends are validated against
/// the full log and written under a store-wide lock, then flushed to disk
/// before returning, so a crash leaves at most the batch in flight missing.
pub struct FsHistoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsHistoryStore {
    /// Create a new store rooted at the given directory path.
    /// If `reset_on_create` is true, delete any existing data under the root first.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        // best-effort create; failures surface on first use
        let _ = std::fs::create_dir_all(&path);
        Self {
            root: path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inst_path(&self, instance: &str) -> Result<PathBuf> {
        if instance.is_empty()
            || instance == "."
            || instance == ".."
            || instance.contains(['/', '\\'])
        {
            return Err(ProviderError::permanent("path", format!("invalid instance id: {instance:?}")).into());
        }
        Ok(self.root.join(format!("{instance}.jsonl")))
    }

    async fn load(&self, path: &Path) -> Result<Option<HistoryLog>> {
        let data = match fs::read_to_string(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProviderError::from_io("read", &e).into()),
        };
        let mut events = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let ev: Event = serde_json::from_str(line).map_err(|e| {
                ProviderError::permanent(
                    "read",
                    format!("corrupt history line {} in {}: {e}", lineno + 1, path.display()),
                )
            })?;
            events.push(ev);
        }
        HistoryLog::from_events(events).map(Some)
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    async fn create_instance(&self, instance: &str) -> Result<()> {
        let path = self.inst_path(instance)?;
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ProviderError::from_io("create_instance", &e))?;
        match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::invalid_state(format!("instance already exists: {instance}")))
            }
            Err(e) => Err(ProviderError::from_io("create_instance", &e).into()),
        }
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>> {
        let path = self.inst_path(instance)?;
        Ok(self.load(&path).await?.map(HistoryLog::into_events).unwrap_or_default())
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<usize> {
        let path = self.inst_path(instance)?;
        let _guard = self.write_lock.lock().await;
        let mut log = self.load(&path).await?.ok_or_else(|| Error::not_found(instance))?;

        let mut buf = String::new();
        let mut appended = 0;
        for e in new_events {
            let line = serde_json::to_string(&e).map_err(Error::codec)?;
            if log.append(e)? == AppendOutcome::Appended {
                buf.push_str(&line);
                buf.push('\n');
                appended += 1;
            }
        }
        if appended == 0 {
            return Ok(0);
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ProviderError::from_io("append", &e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| ProviderError::from_io("append", &e))?;
        file.flush().await.map_err(|e| ProviderError::from_io("append", &e))?;
        file.sync_data().await.map_err(|e| ProviderError::from_io("append", &e))?;
        Ok(appended)
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut rd = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(ProviderError::from_io("list_instances", &e).into()),
        };
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| ProviderError::from_io("list_instances", &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|x| x.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        Ok(out)
    }

    async fn remove_instance(&self, instance: &str) -> Result<()> {
        let path = self.inst_path(instance)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(instance)),
            Err(e) => Err(ProviderError::from_io("remove_instance", &e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_path_like_instance_ids() {
        let td = tempfile::tempdir().unwrap();
        let store = FsHistoryStore::new(td.path(), true);
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(
                matches!(store.create_instance(bad).await, Err(Error::Provider(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn corrupt_line_is_a_permanent_provider_error() {
        let td = tempfile::tempdir().unwrap();
        let store = FsHistoryStore::new(td.path(), true);
        store.create_instance("i1").await.unwrap();
        std::fs::write(td.path().join("i1.jsonl"), "{not json}\n").unwrap();
        match store.read("i1").await {
            Err(Error::Provider(p)) => assert!(!p.is_retryable()),
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}

//! Execution persistence.
//!
//! The engine writes the whole [`Execution`] record after every mutation.
//! Stores only need whole-record put/get; a record is never partially
//! updated.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::error::StoreError;
use super::execution::Execution;

/// Persistence backend for execution records.
pub trait ExecutionStore: Send + Sync {
    /// Replace the stored record for `execution.id`.
    fn put(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Load a record by id.
    fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;

    /// Ids of all stored records.
    fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store, used in tests and when nothing should touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ExecutionStore for MemoryStore {
    fn put(&self, execution: &Execution) -> Result<(), StoreError> {
        self.records.write().insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.records.read().get(execution_id).cloned())
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed JSON file per execution under a directory.
///
/// Reads and writes are synchronous file IO; the engine moves them off
/// async workers on multi-threaded runtimes.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(execution_id)))
    }
}

impl ExecutionStore for JsonFileStore {
    fn put(&self, execution: &Execution) -> Result<(), StoreError> {
        let path = self.record_path(&execution.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(execution)?;

        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let path = self.record_path(execution_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Keep ids usable as file names.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::Context;
    use crate::workflow::template::{StepTemplate, StepType, WorkflowTemplate};

    fn execution() -> Execution {
        let template = WorkflowTemplate::new("wf", "Sample", "planning")
            .with_step(StepTemplate::new("a", "Analyse", StepType::Analysis));
        Execution::new(&template, "task-1", Context::new().with("budget", 100))
    }

    #[test]
    fn test_memory_store_put_get() {
        let store = MemoryStore::new();
        let exec = execution();

        store.put(&exec).unwrap();
        assert_eq!(store.get(&exec.id).unwrap(), Some(exec.clone()));
        assert_eq!(store.list_ids().unwrap(), vec![exec.id.clone()]);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("executions")).unwrap();
        let mut exec = execution();

        store.put(&exec).unwrap();
        exec.context.insert("analysis", serde_json::json!({"risk": "low"}));
        store.put(&exec).unwrap();

        let loaded = store.get(&exec.id).unwrap().unwrap();
        assert_eq!(loaded, exec);
        assert_eq!(store.list_ids().unwrap(), vec![exec.id.clone()]);
        assert!(!store.dir().join(format!("{}.json.tmp", exec.id)).exists());
    }

    #[test]
    fn test_json_store_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_json_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        assert!(matches!(store.get("broken"), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_id("abc-123_x"), "abc-123_x");
    }
}

use fs2::FileExt;
use mscope_core::persisted::{PersistError, PersistedSelection, SelectionPersistence};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub const SELECTION_FILE_NAME: &str = "selection.json";
const LOCK_FILE_NAME: &str = "selection.lock";

/// Persists selections as one JSON object keyed by record key inside a state directory.
#[derive(Debug, Clone)]
pub struct FileSelectionStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileSelectionStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref();
        Self {
            path: state_dir.join(SELECTION_FILE_NAME),
            lock_path: state_dir.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock(&self) -> Result<File, PersistError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn read_entries(&self) -> Result<Map<String, Value>, PersistError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl SelectionPersistence for FileSelectionStore {
    fn load(&self, key: &str) -> Result<Option<PersistedSelection>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let lock = self.open_lock()?;
        lock.lock_shared()?;
        let entries = self.read_entries();
        let _ = lock.unlock();

        let Some(value) = entries?.remove(key) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    fn save(&self, key: &str, selection: &PersistedSelection) -> Result<(), PersistError> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;
        let result = (|| -> Result<(), PersistError> {
            // Unreadable content is overwritten.
            let mut entries = self.read_entries().unwrap_or_default();
            entries.insert(key.to_string(), serde_json::to_value(selection)?);
            let payload = serde_json::to_string_pretty(&Value::Object(entries))?;
            write_atomic(&self.path, &payload)
        })();
        let _ = lock.unlock();
        result
    }
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Process-local selection records. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemorySelectionStore {
    entries: Arc<Mutex<BTreeMap<String, PersistedSelection>>>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<PersistedSelection> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl SelectionPersistence for MemorySelectionStore {
    fn load(&self, key: &str) -> Result<Option<PersistedSelection>, PersistError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, selection: &PersistedSelection) -> Result<(), PersistError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), selection.clone());
        Ok(())
    }
}

//! Durable storage of the last-selected scope
//!
//! The selection survives restarts and is shared by every manager holding the
//! same store. Writes are last-writer-wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Fixed key the selection is stored under
pub const SELECTED_SCOPE_KEY: &str = "selected_scope";

/// File name inside the state directory
pub const STATE_FILE: &str = "state.json";

pub trait ScopeStore: Send + Sync {
    /// Currently selected scope, if any
    fn load(&self) -> Result<Option<String>>;

    /// Persist a selection; `None` clears it
    fn save(&self, scope_id: Option<&str>) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// File-backed
// ─────────────────────────────────────────────────────────────────

/// JSON key/value file under the client's state directory
pub struct FileScopeStore {
    path: PathBuf,
}

impl FileScopeStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| Error::IoRead {
            path: self.path.clone(),
            source: e,
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file is corrupt, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }
}

impl ScopeStore for FileScopeStore {
    fn load(&self) -> Result<Option<String>> {
        let entries = self.read_entries()?;
        Ok(entries
            .get(SELECTED_SCOPE_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    fn save(&self, scope_id: Option<&str>) -> Result<()> {
        let mut entries = self.read_entries()?;
        match scope_id {
            Some(id) => entries.insert(SELECTED_SCOPE_KEY.to_string(), Value::String(id.to_string())),
            None => entries.remove(SELECTED_SCOPE_KEY),
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::IoWrite {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let data = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, data).map_err(|e| Error::IoWrite {
            path: self.path.clone(),
            source: e,
        })?;

        info!(scope_id = ?scope_id, path = %self.path.display(), "Scope selection saved");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryScopeStore {
    selected: RwLock<Option<String>>,
}

impl MemoryScopeStore {
    pub fn new(initial: Option<&str>) -> Self {
        Self {
            selected: RwLock::new(initial.map(str::to_string)),
        }
    }
}

impl ScopeStore for MemoryScopeStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.selected.read().clone())
    }

    fn save(&self, scope_id: Option<&str>) -> Result<()> {
        debug!(scope_id = ?scope_id, "Scope selection updated");
        *self.selected.write() = scope_id.map(str::to_string);
        Ok(())
    }
}

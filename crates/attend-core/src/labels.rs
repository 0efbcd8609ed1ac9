//! Label store: maps recognizer label ids to `"name_rollnumber"` keys.

use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("label store not found: {0} (run `attend train` first)")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("label store: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted `{id: "name_rollnumber"}` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelStore {
    labels: BTreeMap<i32, String>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        if !path.exists() {
            return Err(LabelError::NotFound(path.display().to_string()));
        }
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        let store: Self = serde_json::from_reader(file)?;
        tracing::info!(path = %path.display(), labels = store.len(), "loaded label store");
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<(), LabelError> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn insert(&mut self, id: i32, key: impl Into<String>) {
        self.labels.insert(id, key.into());
    }

    /// Raw composite key for a label id.
    pub fn get(&self, id: i32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Resolve a label id to a person; `None` means "Unknown".
    pub fn identity(&self, id: i32) -> Option<Identity> {
        self.get(id).and_then(Identity::from_label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Hands out label ids 0, 1, 2, … in first-seen order while training.
#[derive(Debug, Default)]
pub struct LabelAssigner {
    ids: HashMap<String, i32>,
    store: LabelStore,
}

impl LabelAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(&mut self, label: &str) -> i32 {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.ids.len() as i32;
        self.ids.insert(label.to_string(), id);
        self.store.insert(id, label);
        id
    }

    pub fn into_store(self) -> LabelStore {
        self.store
    }
}

/// Turn an identity directory name into a raw label: spaces become
/// underscores and the result is lowercased.
pub fn normalize_label(dir_name: &str) -> String {
    dir_name.replace(' ', "_").to_lowercase()
}

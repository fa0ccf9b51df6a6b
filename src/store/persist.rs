//! Durable storage of the group mapping.
//!
//! The blob is a JSON object mapping group name to the list of member
//! recordings. Ungrouped recordings are never written; they are re-listed
//! from the health store.

use crate::store::recording::Recording;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Group name to member snapshots.
pub type Groups = BTreeMap<String, Vec<Recording>>;

/// Errors reading or writing the group blob.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no saved groups at {0}")]
    Missing(PathBuf),
    #[error("saved groups are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("group storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File-backed store for [`Groups`].
#[derive(Debug, Clone)]
pub struct GroupRepository {
    path: PathBuf,
}

impl GroupRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the mapping, replacing the previous blob in one rename.
    pub fn save(&self, groups: &Groups) -> Result<(), PersistenceError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(groups)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|e| PersistenceError::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Groups, PersistenceError> {
        if !self.path.exists() {
            return Err(PersistenceError::Missing(self.path.clone()));
        }
        let content = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Load the mapping, treating missing or unreadable data as no groups.
    pub fn load_or_empty(&self) -> Groups {
        match self.load() {
            Ok(groups) => groups,
            Err(PersistenceError::Missing(_)) => Groups::new(),
            Err(e) => {
                tracing::warn!("Could not restore groups, starting empty: {e}");
                Groups::new()
            }
        }
    }
}

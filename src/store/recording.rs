//! Recording metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ECG recording as listed by a health store.
///
/// Identity is `id`. `group_name` names the group the recording belongs to,
/// if any; the group itself holds a snapshot of the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    /// Length in seconds
    pub duration: f64,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl Recording {
    /// A new ungrouped recording with a fresh id.
    pub fn new(start_date: DateTime<Utc>, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_date,
            duration,
            group_name: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.group_name.is_some()
    }
}

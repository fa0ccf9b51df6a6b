//! The recording catalog and its grouping.
//!
//! [`Catalog`] owns the recordings listed by the health store and the group
//! mapping. Every mutation goes through `&mut self`, so a recording's
//! `group_name` and the member set that contains it are always updated
//! together. Share it across threads as a [`SharedCatalog`].

use crate::events::Notifier;
use crate::source::{AcquisitionError, HealthStore};
use crate::store::persist::{GroupRepository, Groups, PersistenceError};
use crate::store::recording::Recording;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Change notifications published by a [`Catalog`].
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    /// The recording list was replaced by a fetch
    RecordingsReplaced { count: usize },
    /// Members of a group changed (the group may be new)
    GroupChanged(String),
    /// A group lost its last member and was deleted
    GroupRemoved(String),
    GroupRenamed { from: String, to: String },
    /// Groups were reloaded from durable storage
    Restored { groups: usize },
}

/// Recordings plus their grouping.
#[derive(Debug, Default)]
pub struct Catalog {
    recordings: Vec<Recording>,
    groups: Groups,
    repository: Option<GroupRepository>,
    notifier: Notifier<CatalogEvent>,
}

impl Catalog {
    /// An empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog whose groups are restored from, and saved after every
    /// mutation to, the JSON blob at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut catalog = Self::new();
        catalog.repository = Some(GroupRepository::new(path));
        catalog.restore();
        catalog
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&mut self) -> Receiver<CatalogEvent> {
        self.notifier.subscribe()
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&[Recording]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Look a recording up by id, in the listing first and then in groups.
    pub fn recording(&self, id: Uuid) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id).or_else(|| {
            self.groups
                .values()
                .flat_map(|members| members.iter())
                .find(|r| r.id == id)
        })
    }

    /// Name of the group containing `id`, if any.
    pub fn group_of(&self, id: Uuid) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.id == id))
            .map(|(name, _)| name.as_str())
    }

    /// Replace the recording list with the health store's current listing.
    pub fn fetch_catalog(
        &mut self,
        store: &dyn HealthStore,
    ) -> Result<&[Recording], AcquisitionError> {
        let listed = store.list_recordings()?;
        self.replace_recordings(listed);
        Ok(&self.recordings)
    }

    /// Replace the recording list wholesale. Group assignments are taken from
    /// the group mapping, not from the incoming records.
    pub fn replace_recordings(&mut self, recordings: Vec<Recording>) {
        self.recordings = recordings;
        self.sync_group_names();
        tracing::debug!(count = self.recordings.len(), "Catalog replaced");
        self.notifier.publish(CatalogEvent::RecordingsReplaced {
            count: self.recordings.len(),
        });
    }

    /// Put `recording` in `group`, leaving any group it was in before.
    /// Assigning to the current group changes nothing.
    pub fn assign_to_group(&mut self, recording: &Recording, group: &str) {
        if group.is_empty() {
            tracing::warn!(
                recording = %recording.id,
                "Ignoring assignment to an empty group name"
            );
            return;
        }
        if self.group_of(recording.id) == Some(group) {
            return;
        }

        self.detach(recording.id);

        let mut member = recording.clone();
        member.group_name = Some(group.to_string());
        self.groups.entry(group.to_string()).or_default().push(member);
        self.set_listed_group(recording.id, Some(group));

        self.notifier
            .publish(CatalogEvent::GroupChanged(group.to_string()));
        self.save_quietly();
    }

    /// Take `recording` out of its group. Groups left empty are deleted.
    pub fn remove_from_group(&mut self, recording: &Recording) {
        if self.detach(recording.id).is_none() {
            return;
        }
        self.set_listed_group(recording.id, None);
        self.save_quietly();
    }

    /// Move all members of `old` under `new`.
    ///
    /// Nothing happens when the names are equal or `new` is empty. A missing
    /// `old` group is logged and ignored. If `new` already exists the member
    /// sets are merged.
    pub fn rename_group(&mut self, old: &str, new: &str) {
        if old == new || new.is_empty() {
            return;
        }
        let Some(members) = self.groups.remove(old) else {
            tracing::warn!(group = old, "Cannot rename missing group");
            return;
        };

        let target = self.groups.entry(new.to_string()).or_default();
        for mut member in members {
            if target.iter().any(|m| m.id == member.id) {
                continue;
            }
            member.group_name = Some(new.to_string());
            target.push(member);
        }
        self.sync_group_names();

        tracing::info!(from = old, to = new, "Renamed group");
        self.notifier.publish(CatalogEvent::GroupRenamed {
            from: old.to_string(),
            to: new.to_string(),
        });
        self.save_quietly();
    }

    /// Write the group mapping to durable storage.
    ///
    /// A catalog without persistence has nothing to write and succeeds.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        match &self.repository {
            Some(repo) => repo.save(&self.groups),
            None => Ok(()),
        }
    }

    /// Reload the group mapping from durable storage.
    ///
    /// Missing or corrupt data leaves the catalog with no groups. Loaded
    /// groups are cleaned up: empty groups are dropped, member back-references
    /// are set to the group key, and a recording listed under several groups
    /// is kept only in the first.
    pub fn restore(&mut self) {
        let Some(repo) = &self.repository else {
            return;
        };
        let loaded = repo.load_or_empty();

        let mut groups = Groups::new();
        let mut seen: Vec<Uuid> = Vec::new();
        for (name, members) in loaded {
            if name.is_empty() {
                continue;
            }
            let mut kept = Vec::with_capacity(members.len());
            for mut member in members {
                if seen.contains(&member.id) {
                    tracing::warn!(
                        recording = %member.id,
                        group = %name,
                        "Dropping duplicate group membership"
                    );
                    continue;
                }
                seen.push(member.id);
                member.group_name = Some(name.clone());
                kept.push(member);
            }
            if !kept.is_empty() {
                groups.insert(name, kept);
            }
        }

        self.groups = groups;
        self.sync_group_names();
        self.notifier.publish(CatalogEvent::Restored {
            groups: self.groups.len(),
        });
    }

    /// Remove `id` from whatever group holds it, deleting the group when it
    /// empties. Returns the group name it was removed from.
    fn detach(&mut self, id: Uuid) -> Option<String> {
        let name = self.group_of(id)?.to_string();
        let emptied = match self.groups.get_mut(&name) {
            Some(members) => {
                members.retain(|m| m.id != id);
                members.is_empty()
            }
            None => false,
        };

        if emptied {
            self.groups.remove(&name);
            self.notifier.publish(CatalogEvent::GroupRemoved(name.clone()));
        } else {
            self.notifier.publish(CatalogEvent::GroupChanged(name.clone()));
        }
        Some(name)
    }

    fn set_listed_group(&mut self, id: Uuid, group: Option<&str>) {
        for recording in self.recordings.iter_mut().filter(|r| r.id == id) {
            recording.group_name = group.map(str::to_string);
        }
    }

    /// Make every listed recording's `group_name` agree with the mapping.
    fn sync_group_names(&mut self) {
        let groups = &self.groups;
        for recording in &mut self.recordings {
            recording.group_name = groups
                .iter()
                .find(|(_, members)| members.iter().any(|m| m.id == recording.id))
                .map(|(name, _)| name.clone());
        }
    }

    fn save_quietly(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!("Could not save groups: {e}");
        }
    }
}

/// Thread-safe shared catalog. The mutex serializes group mutations.
pub type SharedCatalog = Arc<Mutex<Catalog>>;

/// Create a new shared catalog with persistence.
pub fn create_shared_catalog_with_persistence(path: PathBuf) -> SharedCatalog {
    Arc::new(Mutex::new(Catalog::with_persistence(path)))
}

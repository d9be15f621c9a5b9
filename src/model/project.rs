//! Project - groups and dataset associations

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{DatasetId, Group, GroupId, ProjectId};
use crate::{Error, Result};

/// One `(group, sensor)` pair of the group metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    /// Group identity
    pub group_id: GroupId,
    /// Group key
    pub key: String,
    /// Group value
    pub value: String,
    /// Tagged sensor (effective name)
    pub sensor: String,
}

/// Project Record.
///
/// Datasets are associated, not owned: detaching one leaves it intact.
/// Groups are owned and unique per `(key, value)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    id: ProjectId,
    name: String,
    notes: Option<String>,
    datasets: BTreeSet<DatasetId>,
    groups: Vec<Group>,
    next_group_id: u64,
}

impl Project {
    /// Create an empty project.
    #[must_use]
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            notes: None,
            datasets: BTreeSet::new(),
            groups: Vec::new(),
            next_group_id: 1,
        }
    }

    /// Get the project ID.
    #[must_use]
    pub const fn id(&self) -> ProjectId {
        self.id
    }

    /// Get the project name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Set the notes.
    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = Some(notes.into());
    }

    /// Associated dataset identities.
    #[must_use]
    pub const fn datasets(&self) -> &BTreeSet<DatasetId> {
        &self.datasets
    }

    /// Associate a dataset. Returns `false` if it was already attached.
    pub fn attach_dataset(&mut self, dataset: DatasetId) -> bool {
        self.datasets.insert(dataset)
    }

    /// Drop the association with a dataset.
    pub fn detach_dataset(&mut self, dataset: DatasetId) -> bool {
        self.datasets.remove(&dataset)
    }

    /// All groups of the project.
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Look up the group tagged `(key, value)`.
    #[must_use]
    pub fn group(&self, key: &str, value: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.is(key, value))
    }

    /// Merge `sensor_names` into the `(key, value)` group, creating it if absent.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if key or value is empty.
    pub fn upsert_group(
        &mut self,
        key: &str,
        value: &str,
        sensor_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<GroupId> {
        if key.is_empty() {
            return Err(Error::param("group key cannot be empty"));
        }
        if value.is_empty() {
            return Err(Error::param("group value cannot be empty"));
        }
        let names = sensor_names.into_iter().map(Into::into);
        if let Some(group) = self.groups.iter_mut().find(|g| g.is(key, value)) {
            group.extend_names(names);
            return Ok(group.id());
        }
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.groups.push(Group::new(id, key, value, names));
        Ok(id)
    }

    /// Remove the `(key, value)` group.
    pub fn remove_group(&mut self, key: &str, value: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| !g.is(key, value));
        self.groups.len() != before
    }

    /// Group keys and, per key, the values in use.
    #[must_use]
    pub fn filter_options(&self) -> BTreeMap<String, Vec<String>> {
        let mut options: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for group in &self.groups {
            options
                .entry(group.key().to_string())
                .or_default()
                .push(group.value().to_string());
        }
        options
    }

    /// Candidates that no group under `key` tags yet.
    #[must_use]
    pub fn unassigned_sensor_names<'a>(
        &self,
        key: &str,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        let assigned: BTreeSet<&str> = self
            .groups
            .iter()
            .filter(|g| g.key() == key)
            .flat_map(|g| g.sensor_names().iter().map(String::as_str))
            .collect();
        candidates
            .into_iter()
            .filter(|name| !assigned.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Copy groups of `source` whose `(key, value)` is absent here.
    ///
    /// Only sensor names among `candidates` that are still unassigned for the
    /// group's key are carried over. Returns the identities of the new groups.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if a source group has an empty key or value.
    pub fn clone_groups_from(
        &mut self,
        source: &Self,
        candidates: &BTreeSet<String>,
    ) -> Result<Vec<GroupId>> {
        let mut created = Vec::new();
        for group in &source.groups {
            if self.group(group.key(), group.value()).is_some() {
                continue;
            }
            let unassigned =
                self.unassigned_sensor_names(group.key(), candidates.iter().map(String::as_str));
            let names: Vec<String> = group
                .sensor_names()
                .iter()
                .filter(|name| unassigned.contains(*name))
                .cloned()
                .collect();
            created.push(self.upsert_group(group.key(), group.value(), names)?);
        }
        Ok(created)
    }

    /// `(group, sensor)` rows for the given trial sensors, optionally for one key only.
    #[must_use]
    pub fn group_rows_for(&self, trial_sensors: &BTreeSet<String>, key: Option<&str>) -> Vec<GroupRow> {
        self.groups
            .iter()
            .filter(|g| key.map_or(true, |k| g.key() == k))
            .flat_map(|g| {
                g.sensor_names()
                    .iter()
                    .filter(|name| trial_sensors.contains(*name))
                    .map(|name| GroupRow {
                        group_id: g.id(),
                        key: g.key().to_string(),
                        value: g.value().to_string(),
                        sensor: name.clone(),
                    })
            })
            .collect()
    }

    /// Explicitly re-point group references from `old` to `new`.
    ///
    /// Returns the number of groups touched.
    pub fn resync_sensor_name(&mut self, old: &str, new: &str) -> usize {
        self.groups
            .iter_mut()
            .map(|g| g.rename_member(old, new))
            .filter(|touched| *touched)
            .count()
    }
}

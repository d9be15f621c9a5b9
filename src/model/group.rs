//! Group - a project-scoped (key, value) tag over sensor names

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::GroupId;

/// Group Record.
///
/// Used purely for filtering. Sensor names are effective names and are not
/// owned: renaming a sensor leaves the old name here until the project is
/// explicitly re-synced, and filtering by the group fails meanwhile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    key: String,
    value: String,
    sensor_names: BTreeSet<String>,
}

impl Group {
    /// Create a group record.
    #[must_use]
    pub fn new(
        id: GroupId,
        key: impl Into<String>,
        value: impl Into<String>,
        sensor_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            value: value.into(),
            sensor_names: sensor_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Get the group ID.
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Get the group key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the group value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Tagged sensor names.
    #[must_use]
    pub const fn sensor_names(&self) -> &BTreeSet<String> {
        &self.sensor_names
    }

    /// Whether this group is tagged `(key, value)`.
    #[must_use]
    pub fn is(&self, key: &str, value: &str) -> bool {
        self.key == key && self.value == value
    }

    pub(crate) fn extend_names(&mut self, names: impl IntoIterator<Item = String>) {
        self.sensor_names.extend(names);
    }

    pub(crate) fn rename_member(&mut self, old: &str, new: &str) -> bool {
        if self.sensor_names.remove(old) {
            self.sensor_names.insert(new.to_string());
            true
        } else {
            false
        }
    }
}

//! Sensor - a named variable of one trial

use serde::{Deserialize, Serialize};

/// Sensor Record.
///
/// The raw name is the variable stored in the fact log and never changes.
/// The display name is an optional alias; an empty display name counts as unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Sensor {
    raw_name: String,
    display_name: Option<String>,
}

impl Sensor {
    /// Create a sensor without a display name.
    #[must_use]
    pub fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            display_name: None,
        }
    }

    /// Create a sensor with a display name (empty string means unset).
    #[must_use]
    pub fn with_display_name(raw_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        let mut sensor = Self::new(raw_name);
        sensor.set_display_name(Some(display_name.into()));
        sensor
    }

    /// Get the raw variable name.
    #[must_use]
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Get the display name, if set.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Display name if set, else raw name.
    #[must_use]
    pub fn effective_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.raw_name)
    }

    pub(crate) fn set_display_name(&mut self, display_name: Option<String>) {
        self.display_name = display_name.filter(|name| !name.is_empty());
    }
}

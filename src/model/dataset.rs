//! Dataset - a named, time-bounded view over one trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DatasetId, TrialId};
use crate::{Error, Result};

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Exclusive upper bound
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting `start > end`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the bounds are inverted.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::param(format!(
                "window start {start} is after window end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `ts` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether `other` lies entirely within this window.
    #[must_use]
    pub fn encloses(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Dataset Record.
///
/// A dataset never touches measurement facts; it only restricts what a query
/// over its trial returns. Exclusions are owned by the dataset and stored
/// next to it by the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    id: DatasetId,
    name: String,
    notes: Option<String>,
    trial_id: TrialId,
    window: TimeWindow,
}

impl Dataset {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(name: impl Into<String>, trial_id: TrialId, window: TimeWindow) -> DatasetBuilder {
        DatasetBuilder::new(name, trial_id, window)
    }

    /// Get the dataset ID.
    #[must_use]
    pub const fn id(&self) -> DatasetId {
        self.id
    }

    /// Get the dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Get the owning trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the time window.
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        self.window
    }

    pub(crate) fn assign(mut self, id: DatasetId, name: String) -> Self {
        self.id = id;
        self.name = name;
        self
    }
}

/// Builder for `Dataset`.
#[derive(Debug)]
pub struct DatasetBuilder {
    name: String,
    notes: Option<String>,
    trial_id: TrialId,
    window: TimeWindow,
}

impl DatasetBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, trial_id: TrialId, window: TimeWindow) -> Self {
        Self {
            name: name.into(),
            notes: None,
            trial_id,
            window,
        }
    }

    /// Set free-text notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Build the `Dataset`. The identity is assigned by the repository on insert.
    #[must_use]
    pub fn build(self) -> Dataset {
        Dataset {
            id: DatasetId(0),
            name: self.name,
            notes: self.notes,
            trial_id: self.trial_id,
            window: self.window,
        }
    }
}

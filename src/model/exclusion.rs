//! Exclusion - a (time range, sensor subset) rule owned by a dataset

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ExclusionId;

/// Closed time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Inclusive upper bound
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range. Ordering of the bounds is checked by the reconciler.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `ts` lies in `[start, end]`.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Whether `start <= end`.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }
}

/// Persisted Exclusion Record.
///
/// Sensors are referenced by effective name and resolved against the trial's
/// catalog every time the exclusion is used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exclusion {
    id: ExclusionId,
    range: TimeRange,
    sensors: BTreeSet<String>,
}

impl Exclusion {
    /// Create an exclusion record.
    #[must_use]
    pub fn new(
        id: ExclusionId,
        range: TimeRange,
        sensors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id,
            range,
            sensors: sensors.into_iter().map(Into::into).collect(),
        }
    }

    /// Get the exclusion ID.
    #[must_use]
    pub const fn id(&self) -> ExclusionId {
        self.id
    }

    /// Get the excluded time range.
    #[must_use]
    pub const fn range(&self) -> TimeRange {
        self.range
    }

    /// Effective names of the sensors this exclusion applies to.
    #[must_use]
    pub const fn sensors(&self) -> &BTreeSet<String> {
        &self.sensors
    }

    /// Whether range and sensor subset equal the given values.
    #[must_use]
    pub fn same_content(&self, range: &TimeRange, sensors: &BTreeSet<String>) -> bool {
        self.range == *range && self.sensors == *sensors
    }

    pub(crate) fn with_id(mut self, id: ExclusionId) -> Self {
        self.id = id;
        self
    }
}

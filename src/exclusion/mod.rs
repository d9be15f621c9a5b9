//! Exclusion rules of a dataset
//!
//! Persisted exclusions name sensors by effective name. Before a query runs
//! they are resolved against the trial's catalog into an [`ExclusionIndex`]
//! keyed by raw variable name, the name the fact log carries.
//!
//! Rules combine with OR: a fact is dropped if any rule covering its variable
//! has a range containing its timestamp. Rule order never matters.

mod reconcile;

pub use reconcile::{EditedRow, ExclusionReconciler, NewExclusion, ReconcilePlan};

use crate::catalog::SensorCatalog;
use crate::model::{Exclusion, TimeRange};
use crate::Result;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

/// Exclusion rules resolved to raw variable names.
#[derive(Debug, Clone, Default)]
pub struct ExclusionIndex {
    by_variable: FxHashMap<String, Vec<TimeRange>>,
    rules: usize,
}

impl ExclusionIndex {
    /// Index with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve persisted exclusions against the catalog.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` if an exclusion names a sensor the
    /// catalog no longer knows (e.g. after a rename).
    pub fn resolve<'a>(
        exclusions: impl IntoIterator<Item = &'a Exclusion>,
        catalog: &SensorCatalog,
    ) -> Result<Self> {
        let mut index = Self::empty();
        for exclusion in exclusions {
            let raw = catalog.resolve_all(exclusion.sensors().iter().map(String::as_str))?;
            index.insert(exclusion.range(), raw);
        }
        Ok(index)
    }

    /// Add one rule for the given raw variable names.
    pub fn insert(&mut self, range: TimeRange, raw_variables: impl IntoIterator<Item = String>) {
        for variable in raw_variables {
            self.by_variable.entry(variable).or_default().push(range);
        }
        self.rules += 1;
    }

    /// Take over every rule of `other`.
    pub fn merge(&mut self, other: Self) {
        for (variable, ranges) in other.by_variable {
            self.by_variable.entry(variable).or_default().extend(ranges);
        }
        self.rules += other.rules;
    }

    /// Whether the fact `(raw_variable, ts)` is covered by any rule.
    #[must_use]
    pub fn excludes(&self, raw_variable: &str, ts: DateTime<Utc>) -> bool {
        self.by_variable
            .get(raw_variable)
            .is_some_and(|ranges| ranges.iter().any(|r| r.contains(ts)))
    }

    /// Number of rules.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rules
    }

    /// Whether the index has no rules.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rules == 0
    }
}

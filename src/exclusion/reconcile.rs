//! Diff an analyst-edited exclusion table against the persisted exclusions
//!
//! ```text
//! persisted P (by id) ─┐
//!                      ├─▶ reconcile ─▶ { updates, inserts, deletes, unchanged }
//! edited table E ──────┘
//! ```
//!
//! Every persisted id lands in exactly one of `updates`, `deletes` or
//! `unchanged`. Edited rows without a persisted counterpart are `inserts`.
//! Rows are validated up front; a bad row rejects the whole table before any
//! operation is produced.

use crate::catalog::SensorCatalog;
use crate::model::{Exclusion, ExclusionId, TimeRange};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// One row of the edited exclusion table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditedRow {
    /// Persisted identity, absent for rows the analyst added
    #[serde(default)]
    pub id: Option<ExclusionId>,
    /// Closed time range
    pub range: TimeRange,
    /// Effective sensor names; `None` means every sensor of the trial
    #[serde(default)]
    pub sensors: Option<BTreeSet<String>>,
}

impl EditedRow {
    /// A row the analyst added.
    #[must_use]
    pub fn new(range: TimeRange, sensors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: None,
            range,
            sensors: Some(sensors.into_iter().map(Into::into).collect()),
        }
    }

    /// A new row applying to every sensor of the trial.
    #[must_use]
    pub const fn all_sensors(range: TimeRange) -> Self {
        Self {
            id: None,
            range,
            sensors: None,
        }
    }

    /// The editable form of a persisted exclusion.
    #[must_use]
    pub fn from_exclusion(exclusion: &Exclusion) -> Self {
        Self {
            id: Some(exclusion.id()),
            range: exclusion.range(),
            sensors: Some(exclusion.sensors().clone()),
        }
    }

    /// Same row carrying a persisted identity.
    #[must_use]
    pub const fn with_id(mut self, id: ExclusionId) -> Self {
        self.id = Some(id);
        self
    }
}

/// An exclusion to be inserted; the identity is assigned on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExclusion {
    /// Closed time range
    pub range: TimeRange,
    /// Effective sensor names, already expanded
    pub sensors: BTreeSet<String>,
}

/// Operations turning the persisted exclusions into the edited table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// Persisted rows whose range or sensors changed, with their new content
    pub updates: Vec<Exclusion>,
    /// Rows without a persisted counterpart
    pub inserts: Vec<NewExclusion>,
    /// Persisted ids missing from the edited table
    pub deletes: Vec<ExclusionId>,
    /// Persisted ids present and identical in the edited table
    pub unchanged: Vec<ExclusionId>,
}

impl ReconcilePlan {
    /// Whether applying the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Compute the exclusion set after applying the plan to `persisted`.
    ///
    /// Pure: `persisted` is not touched, so a failure leaves the caller's state
    /// as it was. Inserted rows get identities from `next_id`. The result is
    /// ordered by identity.
    ///
    /// # Errors
    /// Returns `ConstraintViolation` if the plan no longer matches `persisted`
    /// (an updated or deleted id is gone) or `next_id` hands out a taken id.
    pub fn apply(
        &self,
        persisted: &[Exclusion],
        mut next_id: impl FnMut() -> ExclusionId,
    ) -> Result<Vec<Exclusion>> {
        let mut state: BTreeMap<ExclusionId, Exclusion> =
            persisted.iter().map(|e| (e.id(), e.clone())).collect();

        for id in &self.deletes {
            if state.remove(id).is_none() {
                return Err(Error::ConstraintViolation(format!(
                    "cannot delete {id}: not persisted"
                )));
            }
        }
        for update in &self.updates {
            match state.get_mut(&update.id()) {
                Some(slot) => *slot = update.clone(),
                None => {
                    return Err(Error::ConstraintViolation(format!(
                        "cannot update {}: not persisted",
                        update.id()
                    )))
                }
            }
        }
        for insert in &self.inserts {
            let id = next_id();
            if state.contains_key(&id) {
                return Err(Error::ConstraintViolation(format!("duplicate exclusion identity {id}")));
            }
            state.insert(id, Exclusion::new(id, insert.range, insert.sensors.iter().cloned()));
        }
        Ok(state.into_values().collect())
    }
}

/// Diffs edited exclusion tables for datasets over one trial.
#[derive(Debug, Clone, Copy)]
pub struct ExclusionReconciler<'a> {
    catalog: &'a SensorCatalog,
}

impl<'a> ExclusionReconciler<'a> {
    /// Reconciler validating sensor names against `catalog`.
    #[must_use]
    pub const fn new(catalog: &'a SensorCatalog) -> Self {
        Self { catalog }
    }

    /// Diff `edited` against `persisted`.
    ///
    /// # Errors
    /// - `MalformedExclusion` for an inverted range, an empty sensor subset or
    ///   an identity repeated in the edited table
    /// - `InvalidSensorReference` for a sensor the trial does not have
    pub fn reconcile(&self, persisted: &[Exclusion], edited: &[EditedRow]) -> Result<ReconcilePlan> {
        let rows = self.validate(edited)?;
        let by_id: BTreeMap<ExclusionId, &Exclusion> =
            persisted.iter().map(|e| (e.id(), e)).collect();

        let mut plan = ReconcilePlan::default();
        let mut seen = BTreeSet::new();
        for (id, range, sensors) in rows {
            match id.and_then(|id| by_id.get(&id).map(|e| (id, *e))) {
                Some((id, current)) => {
                    seen.insert(id);
                    if current.same_content(&range, &sensors) {
                        plan.unchanged.push(id);
                    } else {
                        plan.updates.push(Exclusion::new(id, range, sensors));
                    }
                }
                None => plan.inserts.push(NewExclusion { range, sensors }),
            }
        }
        plan.deletes = persisted
            .iter()
            .map(Exclusion::id)
            .filter(|id| !seen.contains(id))
            .collect();

        info!(
            trial = %self.catalog.trial(),
            updates = plan.updates.len(),
            inserts = plan.inserts.len(),
            deletes = plan.deletes.len(),
            unchanged = plan.unchanged.len(),
            "reconciled exclusion table"
        );
        Ok(plan)
    }

    fn validate(
        &self,
        edited: &[EditedRow],
    ) -> Result<Vec<(Option<ExclusionId>, TimeRange, BTreeSet<String>)>> {
        let mut ids = BTreeSet::new();
        let mut rows = Vec::with_capacity(edited.len());
        for (i, row) in edited.iter().enumerate() {
            if !row.range.is_ordered() {
                return Err(Error::MalformedExclusion(format!(
                    "row {i}: start {} is after end {}",
                    row.range.start, row.range.end
                )));
            }
            if let Some(id) = row.id {
                if !ids.insert(id) {
                    return Err(Error::MalformedExclusion(format!("row {i}: {id} appears twice")));
                }
            }
            let sensors = match &row.sensors {
                None => self.catalog.effective_names(),
                Some(names) if names.is_empty() => {
                    return Err(Error::MalformedExclusion(format!("row {i}: no sensors")));
                }
                Some(names) => {
                    for name in names {
                        self.catalog.resolve(name)?;
                    }
                    names.clone()
                }
            };
            rows.push((row.id, row.range, sensors));
        }
        Ok(rows)
    }
}

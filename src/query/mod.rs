//! Exclusion-aware retrieval over a trial's fact log
//!
//! A query composes four inputs into one lazy row stream:
//!
//! ```text
//! fact log snapshot ─┐
//! time window ───────┤
//! sensor subset ─────┼─▶ QueryBuilder::build ─▶ QueryRows (ascending)
//! exclusion rules ───┘
//! ```
//!
//! A fact is returned iff its timestamp lies in the half-open window, its
//! variable is selected, and no exclusion rule covers `(variable, timestamp)`.
//! Queries are pure reads over a point-in-time snapshot and are recomputed
//! whenever any input changes.

mod executor;

pub use executor::{QueryRows, Row};

use crate::catalog::SensorCatalog;
use crate::exclusion::ExclusionIndex;
use crate::filter::FilterSpec;
use crate::model::{Exclusion, ProjectId, TimeWindow};
use crate::storage::TrialLog;
use crate::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Sensor selection of a dataset query.
///
/// `sensors` lists effective names; `None` selects every sensor of the trial.
/// `filters` then narrow the selection in order. Group filters are looked up
/// in `project`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Requested sensors (effective names)
    #[serde(default)]
    pub sensors: Option<Vec<String>>,
    /// Ordered selection filters
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Project providing groups for group filters
    #[serde(default)]
    pub project: Option<ProjectId>,
}

impl QueryRequest {
    /// Request for every sensor of the trial.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Request for the given effective names.
    #[must_use]
    pub fn sensors(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sensors: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Append a selection filter.
    #[must_use]
    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    /// Resolve group filters against `project`.
    #[must_use]
    pub const fn in_project(mut self, project: ProjectId) -> Self {
        self.project = Some(project);
        self
    }
}

/// Builds a [`QueryRows`] stream over one trial log.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    log: Arc<TrialLog>,
    catalog: &'a SensorCatalog,
    window: Option<TimeWindow>,
    sensors: Option<Vec<String>>,
    exclusions: Vec<&'a Exclusion>,
    index: Option<ExclusionIndex>,
}

impl<'a> QueryBuilder<'a> {
    /// Query over `log`, naming sensors through `catalog`.
    ///
    /// Without further input the query covers the whole trial span and every
    /// sensor, with no exclusions.
    #[must_use]
    pub fn new(log: Arc<TrialLog>, catalog: &'a SensorCatalog) -> Self {
        Self {
            log,
            catalog,
            window: None,
            sensors: None,
            exclusions: Vec::new(),
            index: None,
        }
    }

    /// Restrict to `[start, end)`.
    #[must_use]
    pub const fn window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Restrict to the given effective names.
    #[must_use]
    pub fn sensors<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.sensors = Some(names.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Apply persisted exclusions; their sensor names are resolved at build.
    #[must_use]
    pub fn exclusions(mut self, exclusions: impl IntoIterator<Item = &'a Exclusion>) -> Self {
        self.exclusions.extend(exclusions);
        self
    }

    /// Apply an already resolved exclusion index, in addition to any
    /// persisted exclusions.
    #[must_use]
    pub fn exclusion_index(mut self, index: ExclusionIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Resolve names and produce the row stream.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` if a requested sensor or a sensor named
    /// by an exclusion does not belong to the trial.
    pub fn build(self) -> Result<QueryRows> {
        let selected: FxHashMap<String, String> = match &self.sensors {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.catalog
                        .resolve(name)
                        .map(|s| (s.raw_name().to_string(), s.effective_name().to_string()))
                })
                .collect::<Result<_>>()?,
            None => self
                .catalog
                .sensors()
                .map(|s| (s.raw_name().to_string(), s.effective_name().to_string()))
                .collect(),
        };

        let mut index = ExclusionIndex::resolve(self.exclusions.iter().copied(), self.catalog)?;
        if let Some(extra) = self.index {
            index.merge(extra);
        }

        let window = self
            .window
            .unwrap_or_else(|| self.log.span().covering_window());
        let bounds = self.log.bounds(&window);
        debug!(
            trial = %self.catalog.trial(),
            start = %window.start,
            end = %window.end,
            sensors = selected.len(),
            exclusions = index.len(),
            scanned = bounds.1 - bounds.0,
            "built query"
        );
        Ok(QueryRows::new(self.log, bounds, selected, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExclusionId, TimeRange, TrialId};
    use crate::storage::Measurement;
    use crate::transform::Warning;
    use crate::Error;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn fixture() -> (Arc<TrialLog>, SensorCatalog) {
        let facts = (0..10)
            .flat_map(|h| {
                [
                    Measurement::new(at(h), "A", h as f64),
                    Measurement::new(at(h), "B", 100.0 + h as f64),
                ]
            })
            .collect();
        let log = Arc::new(TrialLog::from_facts(facts).unwrap());
        (log, SensorCatalog::new(TrialId(1), ["A", "B"]))
    }

    #[test]
    fn test_defaults_cover_whole_trial() {
        let (log, catalog) = fixture();
        let rows: Vec<Row> = QueryBuilder::new(log, &catalog).build().unwrap().collect();
        assert_eq!(rows.len(), 20);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_exclusion_applies_to_named_sensor_only() {
        let (log, catalog) = fixture();
        let exclusion = Exclusion::new(ExclusionId(1), TimeRange::new(at(3), at(5)), ["A"]);

        let a = QueryBuilder::new(Arc::clone(&log), &catalog)
            .sensors(["A"])
            .exclusions([&exclusion])
            .build()
            .unwrap();
        assert_eq!(a.count(), 7);

        let b = QueryBuilder::new(log, &catalog)
            .sensors(["B"])
            .exclusions([&exclusion])
            .build()
            .unwrap();
        assert_eq!(b.count(), 10);
    }

    #[test]
    fn test_window_is_half_open() {
        let (log, catalog) = fixture();
        let rows: Vec<Row> = QueryBuilder::new(log, &catalog)
            .window(TimeWindow::new(at(2), at(4)).unwrap())
            .sensors(["A"])
            .build()
            .unwrap()
            .collect();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_rows_carry_effective_names() {
        let (log, mut catalog) = fixture();
        catalog.rename("B", Some("Roof")).unwrap();
        let rows: Vec<Row> = QueryBuilder::new(log, &catalog)
            .sensors(["Roof"])
            .build()
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.variable == "Roof"));
    }

    #[test]
    fn test_unknown_sensor_fails() {
        let (log, catalog) = fixture();
        let err = QueryBuilder::new(log, &catalog).sensors(["C"]).build().unwrap_err();
        assert!(matches!(err, Error::InvalidSensorReference(_)));
    }

    #[test]
    fn test_into_record_batch() {
        let (log, catalog) = fixture();
        let batch = QueryBuilder::new(log, &catalog)
            .sensors(["B"])
            .build()
            .unwrap()
            .into_record_batch()
            .unwrap();
        assert_eq!(batch.num_rows(), 10);
        assert_eq!(batch.num_columns(), 3);
    }

    #[test]
    fn test_fully_excluded_query_reports_empty_result() {
        let (log, catalog) = fixture();
        let exclusion = Exclusion::new(ExclusionId(1), TimeRange::new(at(0), at(9)), ["A"]);
        let mut rows = QueryBuilder::new(Arc::clone(&log), &catalog)
            .sensors(["A"])
            .exclusions([&exclusion])
            .build()
            .unwrap();
        assert_eq!(rows.warning(), None);
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
        assert!(matches!(rows.warning(), Some(Warning::EmptyResult { .. })));

        let mut kept = QueryBuilder::new(log, &catalog).sensors(["B"]).build().unwrap();
        kept.by_ref().for_each(drop);
        assert_eq!(kept.yielded(), 10);
        assert_eq!(kept.warning(), None);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: QueryRequest = serde_json::from_str(r#"{"sensors": ["A"]}"#).unwrap();
        assert_eq!(request, QueryRequest::sensors(["A"]));
        let all: QueryRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(all, QueryRequest::all());
    }
}

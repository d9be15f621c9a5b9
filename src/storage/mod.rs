//! Measurement storage (Arrow/Parquet)
//!
//! **Append-Only Fact Log**:
//! - One Arrow batch per trial: `(timestamp, variable, value)`
//! - Sorted by `(timestamp, variable)` at creation; never mutated afterwards
//! - Primary key `(variable, timestamp)` enforced on creation
//! - Deleted only as a whole, together with its trial
//!
//! Window scans binary-search the timestamp column and yield rows lazily,
//! so a query only touches the slice of the log inside its window.
//!
//! Timestamps are stored at millisecond precision.

use crate::model::{TimeSpan, TimeWindow, TrialId};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Column name of the fact timestamp
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// Column name of the raw variable (sensor raw name)
pub const VARIABLE_COLUMN: &str = "variable";
/// Column name of the reading
pub const VALUE_COLUMN: &str = "value";

/// Arrow schema of a fact log batch.
#[must_use]
pub fn fact_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new(VARIABLE_COLUMN, DataType::Utf8, false),
        Field::new(VALUE_COLUMN, DataType::Float64, false),
    ]))
}

/// One owned reading, as handed over by an importer.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Raw sensor name
    pub variable: String,
    /// Reading
    pub value: f64,
}

impl Measurement {
    /// Create a reading.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, variable: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            variable: variable.into(),
            value,
        }
    }
}

/// A borrowed row of a [`TrialLog`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fact<'a> {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Raw sensor name
    pub variable: &'a str,
    /// Reading
    pub value: f64,
}

/// Immutable, time-ordered fact log of one trial.
#[derive(Debug, Clone)]
pub struct TrialLog {
    timestamps: TimestampMillisecondArray,
    variables: StringArray,
    values: Float64Array,
    span: TimeSpan,
}

impl TrialLog {
    /// Build a log from unordered readings.
    ///
    /// # Errors
    /// - `InvalidParameter` if `facts` is empty or holds a non-finite value
    /// - `ConstraintViolation` if two readings share `(variable, timestamp)`
    pub fn from_facts(mut facts: Vec<Measurement>) -> Result<Self> {
        if facts.is_empty() {
            return Err(Error::param("a trial needs at least one measurement"));
        }
        if let Some(bad) = facts.iter().find(|m| !m.value.is_finite()) {
            return Err(Error::param(format!(
                "non-finite reading {} for {} at {}",
                bad.value, bad.variable, bad.timestamp
            )));
        }

        facts.sort_by(|a, b| {
            a.timestamp
                .timestamp_millis()
                .cmp(&b.timestamp.timestamp_millis())
                .then_with(|| a.variable.cmp(&b.variable))
        });
        if let Some(pair) = facts.windows(2).find(|w| {
            w[0].variable == w[1].variable
                && w[0].timestamp.timestamp_millis() == w[1].timestamp.timestamp_millis()
        }) {
            return Err(Error::ConstraintViolation(format!(
                "duplicate reading for {} at {}",
                pair[0].variable, pair[0].timestamp
            )));
        }

        let timestamps = TimestampMillisecondArray::from_iter_values(
            facts.iter().map(|m| m.timestamp.timestamp_millis()),
        )
        .with_timezone("UTC");
        let variables = StringArray::from_iter_values(facts.iter().map(|m| m.variable.as_str()));
        let values = Float64Array::from_iter_values(facts.iter().map(|m| m.value));

        let first = timestamps.value(0);
        let last = timestamps.value(timestamps.len() - 1);
        let span = TimeSpan {
            start: millis_to_utc(first),
            end: millis_to_utc(last),
        };

        Ok(Self {
            timestamps,
            variables,
            values,
            span,
        })
    }

    /// Observed time span (first and last timestamp).
    #[must_use]
    pub const fn span(&self) -> TimeSpan {
        self.span
    }

    /// Number of facts.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Lazily scan the facts whose timestamp lies in `window`, ascending.
    #[must_use]
    pub fn scan(&self, window: &TimeWindow) -> FactScan<'_> {
        let (pos, end) = self.bounds(window);
        FactScan { log: self, pos, end }
    }

    /// Row positions `[begin, end)` of the facts inside `window`.
    pub(crate) fn bounds(&self, window: &TimeWindow) -> (usize, usize) {
        let ts = self.timestamps.values();
        let lo = window.start.timestamp_millis();
        let hi = window.end.timestamp_millis();
        let begin = ts.partition_point(|&t| t < lo);
        let end = ts.partition_point(|&t| t < hi).max(begin);
        (begin, end)
    }

    /// Distinct raw variable names present in the log, sorted.
    #[must_use]
    pub fn variables(&self) -> std::collections::BTreeSet<String> {
        self.variables.iter().flatten().map(str::to_string).collect()
    }

    /// The log as one Arrow batch with [`fact_schema`].
    ///
    /// # Errors
    /// Returns error if Arrow rejects the columns (never for a well-formed log).
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.timestamps.clone()),
            Arc::new(self.variables.clone()),
            Arc::new(self.values.clone()),
        ];
        Ok(RecordBatch::try_new(fact_schema(), columns)?)
    }

    pub(crate) fn fact(&self, i: usize) -> Fact<'_> {
        Fact {
            timestamp: millis_to_utc(self.timestamps.value(i)),
            variable: self.variables.value(i),
            value: self.values.value(i),
        }
    }
}

/// Iterator over the facts of a [`TrialLog`] inside one window.
pub struct FactScan<'a> {
    log: &'a TrialLog,
    pos: usize,
    end: usize,
}

impl<'a> Iterator for FactScan<'a> {
    type Item = Fact<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let fact = self.log.fact(self.pos);
        self.pos += 1;
        Some(fact)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FactScan<'_> {}

/// Store of trial fact logs.
///
/// Readers get an `Arc` snapshot of a log; a trial's log is created once and
/// only ever removed as a whole.
#[derive(Debug, Default)]
pub struct MeasurementStore {
    logs: DashMap<TrialId, Arc<TrialLog>>,
}

impl MeasurementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the fact log of a new trial and return its derived span.
    ///
    /// # Errors
    /// - `ConstraintViolation` if the trial already has facts or a reading is duplicated
    /// - `InvalidParameter` for an empty fact set or non-finite values
    pub fn create_trial(&self, trial: TrialId, facts: Vec<Measurement>) -> Result<TimeSpan> {
        let log = TrialLog::from_facts(facts)?;
        let span = log.span();
        match self.logs.entry(trial) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::ConstraintViolation(format!(
                "{trial} already has a fact log"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(%trial, rows = log.num_rows(), "created fact log");
                slot.insert(Arc::new(log));
                Ok(span)
            }
        }
    }

    /// Point-in-time snapshot of a trial's log.
    #[must_use]
    pub fn snapshot(&self, trial: TrialId) -> Option<Arc<TrialLog>> {
        self.logs.get(&trial).map(|log| Arc::clone(log.value()))
    }

    /// Drop all facts of a trial in one step.
    pub fn delete_trial(&self, trial: TrialId) -> bool {
        let removed = self.logs.remove(&trial).is_some();
        if removed {
            debug!(%trial, "deleted fact log");
        }
        removed
    }

    /// Number of trials with a fact log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// Whether no trial has a fact log.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Read readings from a Parquet file with `timestamp`, `variable` and `value` columns.
    ///
    /// Timestamp columns of any unit are accepted and normalised to
    /// milliseconds; numeric value columns are cast to `Float64`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or lacks a required column.
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<Measurement>> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

        let reader = builder
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let mut facts = Vec::new();
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
            append_batch_facts(&batch, &mut facts)?;
        }
        Ok(facts)
    }
}

fn append_batch_facts(batch: &RecordBatch, out: &mut Vec<Measurement>) -> Result<()> {
    use arrow::compute::cast;

    let column = |name: &str, target: &DataType| -> Result<ArrayRef> {
        let index = batch
            .schema()
            .index_of(name)
            .map_err(|_| Error::StorageError(format!("Column not found: {name}")))?;
        Ok(cast(batch.column(index), target)?)
    };

    let timestamps = column(
        TIMESTAMP_COLUMN,
        &DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
    )?;
    let variables = column(VARIABLE_COLUMN, &DataType::Utf8)?;
    let values = column(VALUE_COLUMN, &DataType::Float64)?;

    let timestamps = timestamps
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .ok_or_else(|| Error::Other("Failed to downcast to TimestampMillisecondArray".to_string()))?;
    let variables = variables
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Other("Failed to downcast to StringArray".to_string()))?;
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Other("Failed to downcast to Float64Array".to_string()))?;

    for i in 0..batch.num_rows() {
        if timestamps.is_null(i) || variables.is_null(i) || values.is_null(i) {
            continue;
        }
        out.push(Measurement::new(
            millis_to_utc(timestamps.value(i)),
            variables.value(i),
            values.value(i),
        ));
    }
    Ok(())
}

pub(crate) fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn hourly(variable: &str, hours: i64) -> Vec<Measurement> {
        (0..hours)
            .map(|h| Measurement::new(t0() + Duration::hours(h), variable, h as f64))
            .collect()
    }

    #[test]
    fn test_log_is_sorted_and_spans_facts() {
        let mut facts = hourly("B", 3);
        facts.extend(hourly("A", 3));
        facts.reverse();
        let log = TrialLog::from_facts(facts).unwrap();

        assert_eq!(log.num_rows(), 6);
        assert_eq!(log.span().start, t0());
        assert_eq!(log.span().end, t0() + Duration::hours(2));

        let window = log.span().covering_window();
        let rows: Vec<_> = log.scan(&window).map(|f| (f.timestamp, f.variable)).collect();
        assert_eq!(rows[0], (t0(), "A"));
        assert_eq!(rows[1], (t0(), "B"));
        assert!(rows.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_duplicate_reading_is_constraint_violation() {
        let mut facts = hourly("A", 2);
        facts.push(Measurement::new(t0(), "A", 9.0));
        let err = TrialLog::from_facts(facts).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert!(matches!(
            TrialLog::from_facts(vec![]),
            Err(Error::InvalidParameter(_))
        ));
        let facts = vec![Measurement::new(t0(), "A", f64::NAN)];
        assert!(matches!(
            TrialLog::from_facts(facts),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_scan_respects_half_open_window() {
        let log = TrialLog::from_facts(hourly("A", 10)).unwrap();
        let window = TimeWindow::new(t0() + Duration::hours(2), t0() + Duration::hours(5)).unwrap();
        let scan = log.scan(&window);
        assert_eq!(scan.len(), 3);
        let values: Vec<f64> = scan.map(|f| f.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_scan_outside_span_is_empty() {
        let log = TrialLog::from_facts(hourly("A", 3)).unwrap();
        let window = TimeWindow::new(t0() + Duration::days(1), t0() + Duration::days(2)).unwrap();
        assert_eq!(log.scan(&window).count(), 0);
    }

    #[test]
    fn test_store_create_snapshot_delete() {
        let store = MeasurementStore::new();
        let span = store.create_trial(TrialId(1), hourly("A", 4)).unwrap();
        assert_eq!(span.end, t0() + Duration::hours(3));

        let again = store.create_trial(TrialId(1), hourly("A", 1));
        assert!(matches!(again, Err(Error::ConstraintViolation(_))));

        let snapshot = store.snapshot(TrialId(1)).unwrap();
        assert!(store.delete_trial(TrialId(1)));
        assert!(store.snapshot(TrialId(1)).is_none());
        // the snapshot outlives deletion
        assert_eq!(snapshot.num_rows(), 4);
    }

    #[test]
    fn test_record_batch_round_trip_through_parquet() {
        use parquet::arrow::ArrowWriter;

        let log = TrialLog::from_facts(hourly("A", 5)).unwrap();
        let batch = log.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 5);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.parquet");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, fact_schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let facts = MeasurementStore::load_parquet(&path).unwrap();
        assert_eq!(facts, hourly("A", 5));
    }

    #[test]
    fn test_load_parquet_missing_file() {
        let result = MeasurementStore::load_parquet("/nonexistent/facts.parquet");
        assert!(result.unwrap_err().to_string().contains("Failed to open Parquet file"));
    }
}

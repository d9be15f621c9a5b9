//! Lazy row executor
//!
//! A [`QueryRows`] owns an `Arc` snapshot of the trial's fact log and walks
//! the slice of it inside the window, dropping facts of unselected sensors
//! and facts covered by an exclusion rule. Rows come out in log order:
//! ascending timestamp, then raw variable name.
//!
//! A query that runs dry without yielding a row logs one
//! [`Warning::EmptyResult`] and reports it through [`QueryRows::warning`].

use crate::exclusion::ExclusionIndex;
use crate::storage::{fact_schema, TrialLog};
use crate::transform::Warning;
use crate::Result;
use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One query result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Effective sensor name
    pub variable: String,
    /// Reading
    pub value: f64,
}

/// Filtered, ascending rows of one query.
#[derive(Debug, Clone)]
pub struct QueryRows {
    log: Arc<TrialLog>,
    pos: usize,
    end: usize,
    // raw name -> effective name
    selected: FxHashMap<String, String>,
    exclusions: ExclusionIndex,
    yielded: usize,
    reported: bool,
}

impl QueryRows {
    pub(crate) fn new(
        log: Arc<TrialLog>,
        (pos, end): (usize, usize),
        selected: FxHashMap<String, String>,
        exclusions: ExclusionIndex,
    ) -> Self {
        Self {
            log,
            pos,
            end,
            selected,
            exclusions,
            yielded: 0,
            reported: false,
        }
    }

    /// Rows yielded so far.
    #[must_use]
    pub const fn yielded(&self) -> usize {
        self.yielded
    }

    /// `EmptyResult` once the rows are exhausted without yielding any.
    #[must_use]
    pub fn warning(&self) -> Option<Warning> {
        (self.pos >= self.end && self.yielded == 0).then(empty_query)
    }

    /// Drain the rows into an Arrow batch.
    ///
    /// The batch has the fact log schema; `variable` carries effective names.
    ///
    /// # Errors
    /// Returns error if Arrow rejects the columns.
    pub fn into_record_batch(self) -> Result<RecordBatch> {
        let rows: Vec<Row> = self.collect();
        let timestamps = TimestampMillisecondArray::from_iter_values(
            rows.iter().map(|r| r.timestamp.timestamp_millis()),
        )
        .with_timezone("UTC");
        let variables = StringArray::from_iter_values(rows.iter().map(|r| r.variable.as_str()));
        let values = Float64Array::from_iter_values(rows.iter().map(|r| r.value));
        let columns: Vec<ArrayRef> =
            vec![Arc::new(timestamps), Arc::new(variables), Arc::new(values)];
        Ok(RecordBatch::try_new(fact_schema(), columns)?)
    }
}

impl Iterator for QueryRows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        while self.pos < self.end {
            let fact = self.log.fact(self.pos);
            self.pos += 1;
            let Some(effective) = self.selected.get(fact.variable) else {
                continue;
            };
            if self.exclusions.excludes(fact.variable, fact.timestamp) {
                continue;
            }
            self.yielded += 1;
            return Some(Row {
                timestamp: fact.timestamp,
                variable: effective.clone(),
                value: fact.value,
            });
        }
        if self.yielded == 0 && !self.reported {
            self.reported = true;
            warn!(selected = self.selected.len(), "{}", empty_query());
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end - self.pos))
    }
}

fn empty_query() -> Warning {
    Warning::EmptyResult {
        context: "query".to_string(),
    }
}

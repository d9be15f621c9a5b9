//! Wide, time-indexed frame
//!
//! Every transform pivots query rows into a [`WideFrame`] (one row per time
//! key, one column per variable), works column-wise, and melts the result
//! back to long `(time key, variable, value)` rows.

use crate::query::Row;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

/// Index of a long or wide series: an instant or a calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeKey {
    /// A measurement instant
    Timestamp(DateTime<Utc>),
    /// A calendar day
    Day(NaiveDate),
}

impl TimeKey {
    /// Calendar day of the key.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        match self {
            Self::Timestamp(ts) => ts.date_naive(),
            Self::Day(day) => *day,
        }
    }

    /// Milliseconds since the Unix epoch; days map to their midnight.
    #[must_use]
    pub fn millis(&self) -> i64 {
        match self {
            Self::Timestamp(ts) => ts.timestamp_millis(),
            Self::Day(day) => day
                .and_hms_opt(0, 0, 0)
                .map_or(0, |midnight| midnight.and_utc().timestamp_millis()),
        }
    }

    /// Render with `timestamp_format`; days always render as `%Y-%m-%d`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if `timestamp_format` has an unknown specifier.
    pub fn format(&self, timestamp_format: &str) -> Result<String> {
        let mut out = String::new();
        let written = match self {
            Self::Timestamp(ts) => write!(out, "{}", ts.format(timestamp_format)),
            Self::Day(day) => write!(out, "{}", day.format("%Y-%m-%d")),
        };
        written.map_err(|_| Error::param(format!("invalid timestamp format {timestamp_format:?}")))?;
        Ok(out)
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "{ts}"),
            Self::Day(day) => write!(f, "{day}"),
        }
    }
}

/// One row of a long-format series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    /// Time key (timestamp or day)
    pub key: TimeKey,
    /// Effective sensor name
    pub variable: String,
    /// Value
    pub value: f64,
}

/// One row per time key, one nullable column per variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideFrame {
    keys: Vec<TimeKey>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl WideFrame {
    /// Pivot query rows on their timestamp.
    #[must_use]
    pub fn pivot(rows: impl IntoIterator<Item = Row>) -> Self {
        Self::from_long(rows.into_iter().map(|r| SeriesRow {
            key: TimeKey::Timestamp(r.timestamp),
            variable: r.variable,
            value: r.value,
        }))
    }

    /// Pivot long rows on their key. A repeated `(key, variable)` keeps the last value.
    #[must_use]
    pub fn from_long(rows: impl IntoIterator<Item = SeriesRow>) -> Self {
        let rows: Vec<SeriesRow> = rows.into_iter().collect();
        let mut keys: Vec<TimeKey> = rows.iter().map(|r| r.key).collect();
        keys.sort_unstable();
        keys.dedup();
        let position: FxHashMap<TimeKey, usize> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let mut columns: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
        for row in rows {
            if let Some(&i) = position.get(&row.key) {
                columns
                    .entry(row.variable)
                    .or_insert_with(|| vec![None; keys.len()])[i] = Some(row.value);
            }
        }
        Self { keys, columns }
    }

    pub(crate) fn from_parts(keys: Vec<TimeKey>, columns: BTreeMap<String, Vec<Option<f64>>>) -> Self {
        Self { keys, columns }
    }

    /// Sorted, unique time keys.
    #[must_use]
    pub fn keys(&self) -> &[TimeKey] {
        &self.keys
    }

    /// Variable names, sorted.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Column of `variable`, aligned with [`Self::keys`].
    #[must_use]
    pub fn column(&self, variable: &str) -> Option<&[Option<f64>]> {
        self.columns.get(variable).map(Vec::as_slice)
    }

    /// Add an all-null column unless `variable` is present.
    pub fn ensure_column(&mut self, variable: &str) {
        if !self.columns.contains_key(variable) {
            self.columns
                .insert(variable.to_string(), vec![None; self.keys.len()]);
        }
    }

    /// Take a column out of the frame.
    pub fn remove_column(&mut self, variable: &str) -> Option<Vec<Option<f64>>> {
        self.columns.remove(variable)
    }

    /// Non-null `(key, value)` pairs of a column.
    #[must_use]
    pub fn points(&self, variable: &str) -> Vec<(TimeKey, f64)> {
        self.column(variable)
            .map(|col| {
                self.keys
                    .iter()
                    .zip(col)
                    .filter_map(|(k, v)| v.map(|v| (*k, v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of time keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the frame has no time keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Replace every column by `f(name, keys, column)`.
    #[must_use]
    pub fn map_columns(
        self,
        mut f: impl FnMut(&str, &[TimeKey], Vec<Option<f64>>) -> Vec<Option<f64>>,
    ) -> Self {
        let keys = self.keys;
        let columns = self
            .columns
            .into_iter()
            .map(|(name, col)| {
                let mapped = f(&name, &keys, col);
                (name, mapped)
            })
            .collect();
        Self { keys, columns }
    }

    /// Aggregate every column per calendar day.
    ///
    /// `agg` sees the non-null values of one column on one day and returns
    /// the day's value, or `None` to leave the cell empty. Days on which a
    /// column has no readings stay empty without calling `agg`.
    #[must_use]
    pub fn by_day(&self, agg: impl Fn(&[f64]) -> Option<f64>) -> Self {
        let mut days: Vec<TimeKey> = self.keys.iter().map(|k| TimeKey::Day(k.day())).collect();
        days.dedup();
        let slot: FxHashMap<TimeKey, usize> =
            days.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let columns = self
            .columns
            .iter()
            .map(|(name, col)| {
                let mut per_day: Vec<Vec<f64>> = vec![Vec::new(); days.len()];
                for (key, value) in self.keys.iter().zip(col) {
                    if let (Some(v), Some(&i)) = (value, slot.get(&TimeKey::Day(key.day()))) {
                        per_day[i].push(*v);
                    }
                }
                let out = per_day
                    .iter()
                    .map(|values| if values.is_empty() { None } else { agg(values) })
                    .collect();
                (name.clone(), out)
            })
            .collect();
        Self {
            keys: days,
            columns,
        }
    }

    /// Melt back to long rows, ordered by key then variable.
    ///
    /// Null and non-finite cells are dropped.
    #[must_use]
    pub fn melt(&self) -> Vec<SeriesRow> {
        let mut rows = Vec::new();
        for (i, key) in self.keys.iter().enumerate() {
            for (name, col) in &self.columns {
                if let Some(v) = col[i].filter(|v| v.is_finite()) {
                    rows.push(SeriesRow {
                        key: *key,
                        variable: name.clone(),
                        value: v,
                    });
                }
            }
        }
        rows
    }
}

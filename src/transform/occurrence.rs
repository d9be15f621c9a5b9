//! Per-day count of readings inside a closed interval

use super::frame::WideFrame;
use super::{AxisRole, Preprocessor};
use crate::Result;

/// Counts, per sensor and day, the readings in `[lower, upper]`.
///
/// Days with no reading in range are absent from the output, not zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccurrenceCount {
    lower: f64,
    upper: f64,
}

impl OccurrenceCount {
    /// Count readings in `[lower, upper]`. Bounds are validated by [`super::Transform`].
    #[must_use]
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }
}

impl Preprocessor for OccurrenceCount {
    fn describe(&self) -> String {
        format!("Occurrence count between ({} - {})", self.lower, self.upper)
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Day, AxisRole::Count)
    }

    fn process(&self, frame: WideFrame) -> Result<WideFrame> {
        Ok(frame.by_day(|values| {
            let hits = values
                .iter()
                .filter(|v| (self.lower..=self.upper).contains(*v))
                .count();
            (hits > 0).then_some(hits as f64)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Row;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_counts_closed_interval_and_skips_empty_days() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let values = [(0, 10.0), (1, 20.0), (2, 25.0), (24, 30.0), (25, 5.0)];
        let rows = values.iter().map(|(h, v)| Row {
            timestamp: t0 + Duration::hours(*h),
            variable: "T".to_string(),
            value: *v,
        });
        let out = OccurrenceCount::new(10.0, 20.0)
            .process(WideFrame::pivot(rows))
            .unwrap()
            .melt();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.day(), t0.date_naive());
        assert!((out[0].value - 2.0).abs() < f64::EPSILON);
    }
}

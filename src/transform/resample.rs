//! Epoch-aligned mean resampling and clamped linear interpolation

use super::frame::{TimeKey, WideFrame};
use crate::storage::millis_to_utc;
use std::collections::{BTreeMap, BTreeSet};

/// Mean spacing of the keys in seconds; `None` for fewer than two keys.
pub(crate) fn natural_interval_secs(keys: &[TimeKey]) -> Option<f64> {
    if keys.len() < 2 {
        return None;
    }
    let first = keys[0].millis();
    let last = keys[keys.len() - 1].millis();
    // mean of consecutive diffs telescopes to (last - first) / (n - 1)
    Some((last - first) as f64 / 1000.0 / (keys.len() - 1) as f64)
}

/// Mean of each column over buckets `[k * step, (k + 1) * step)` since the epoch.
///
/// Buckets are labelled by their start. A bucket no column has readings in
/// is not emitted at all.
pub(crate) fn resample_mean(frame: &WideFrame, step_ms: i64) -> WideFrame {
    let step_ms = step_ms.max(1);
    let sums: Vec<(String, BTreeMap<i64, (f64, usize)>)> = frame
        .variables()
        .map(|name| {
            let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
            for (key, value) in frame.points(name) {
                let start = key.millis().div_euclid(step_ms) * step_ms;
                let slot = buckets.entry(start).or_insert((0.0, 0));
                slot.0 += value;
                slot.1 += 1;
            }
            (name.to_string(), buckets)
        })
        .collect();

    let starts: BTreeSet<i64> = sums.iter().flat_map(|(_, b)| b.keys().copied()).collect();
    let keys: Vec<TimeKey> = starts
        .iter()
        .map(|ms| TimeKey::Timestamp(millis_to_utc(*ms)))
        .collect();
    let columns = sums
        .into_iter()
        .map(|(name, buckets)| {
            let col = starts
                .iter()
                .map(|start| buckets.get(start).map(|(sum, n)| sum / *n as f64))
                .collect();
            (name, col)
        })
        .collect();
    WideFrame::from_parts(keys, columns)
}

/// Linear interpolation through `points` (ascending x), holding the end
/// values outside their range. `None` if there are no points.
pub(crate) fn interpolate_clamped(points: &[(i64, f64)], x: i64) -> Option<f64> {
    let (first, last) = (points.first()?, points.last()?);
    if x <= first.0 {
        return Some(first.1);
    }
    if x >= last.0 {
        return Some(last.1);
    }
    let upper = points.partition_point(|(px, _)| *px <= x);
    let (x0, y0) = points[upper - 1];
    let (x1, y1) = points[upper];
    if x1 == x0 {
        return Some(y0);
    }
    let t = (x - x0) as f64 / (x1 - x0) as f64;
    Some(y0 + t * (y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::SeriesRow;

    fn key(ms: i64) -> TimeKey {
        TimeKey::Timestamp(millis_to_utc(ms))
    }

    fn frame(points: &[(i64, f64)]) -> WideFrame {
        WideFrame::from_long(points.iter().map(|(ms, v)| SeriesRow {
            key: key(*ms),
            variable: "A".to_string(),
            value: *v,
        }))
    }

    #[test]
    fn test_natural_interval() {
        assert_eq!(natural_interval_secs(&[key(0)]), None);
        assert_eq!(natural_interval_secs(&[key(0), key(60_000), key(120_000)]), Some(60.0));
    }

    #[test]
    fn test_resample_buckets_are_epoch_aligned() {
        let f = frame(&[(500, 1.0), (1_500, 3.0), (1_900, 5.0), (4_200, 7.0)]);
        let out = resample_mean(&f, 1_000);
        let millis: Vec<i64> = out.keys().iter().map(TimeKey::millis).collect();
        assert_eq!(millis, vec![0, 1_000, 4_000]);
        assert_eq!(out.column("A").unwrap(), &[Some(1.0), Some(4.0), Some(7.0)]);
    }

    #[test]
    fn test_interpolation_clamps_at_ends() {
        let points = [(10, 1.0), (20, 3.0)];
        assert_eq!(interpolate_clamped(&points, 0), Some(1.0));
        assert_eq!(interpolate_clamped(&points, 15), Some(2.0));
        assert_eq!(interpolate_clamped(&points, 30), Some(3.0));
        assert_eq!(interpolate_clamped(&[], 5), None);
    }
}

//! Daily light integral

use super::frame::WideFrame;
use super::{AxisRole, Preprocessor};
use crate::Result;

/// Minute-sampled PAR (µmol·m⁻²·s⁻¹) summed per day to mol·m⁻²·day⁻¹.
pub const DEFAULT_DLI_SCALE: f64 = 60.0 / 1_000_000.0;

/// Sums each sensor per calendar day and scales the sum.
///
/// The default scale assumes one reading per minute; the caller is
/// responsible for the sampling interval matching the scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyLightIntegral {
    scale: f64,
}

impl DailyLightIntegral {
    /// Integral with the given per-reading scale factor.
    #[must_use]
    pub const fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl Default for DailyLightIntegral {
    fn default() -> Self {
        Self::new(DEFAULT_DLI_SCALE)
    }
}

impl Preprocessor for DailyLightIntegral {
    fn describe(&self) -> String {
        "DLI (mol/m2/day)".to_string()
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Day, AxisRole::Value)
    }

    fn process(&self, frame: WideFrame) -> Result<WideFrame> {
        Ok(frame.by_day(|values| Some(values.iter().sum::<f64>() * self.scale)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Row;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    #[test]
    fn test_constant_par_over_a_day() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let rows = (0..1440).map(|m| Row {
            timestamp: t0 + Duration::minutes(m),
            variable: "PAR".to_string(),
            value: 500.0,
        });
        let out = DailyLightIntegral::default()
            .process(WideFrame::pivot(rows))
            .unwrap()
            .melt();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.day(), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!((out[0].value - 500.0 * 1440.0 * 60.0 / 1_000_000.0).abs() < 1e-9);
    }
}

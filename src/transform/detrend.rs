//! Detrending and running mean at a fixed resolution
//!
//! Both compare the natural sampling interval of the frame (mean spacing of
//! its timestamps) against the requested resolution:
//!
//! | transform    | resamples when          | returns                       |
//! |--------------|-------------------------|-------------------------------|
//! | Detrend      | natural < resolution    | raw minus interpolated mean   |
//! | Running mean | natural > resolution    | the (resampled) mean itself   |

use super::frame::WideFrame;
use super::resample::{interpolate_clamped, natural_interval_secs, resample_mean};
use super::{AxisRole, Preprocessor, Resolution};
use crate::Result;
use tracing::debug;

/// Subtracts a coarse moving mean from the raw readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detrend {
    resolution: Resolution,
}

impl Detrend {
    /// Detrend at `resolution`.
    #[must_use]
    pub const fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

impl Preprocessor for Detrend {
    fn describe(&self) -> String {
        format!("Detrended ({})", self.resolution)
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Timestamp, AxisRole::Value)
    }

    fn process(&self, frame: WideFrame) -> Result<WideFrame> {
        let natural = natural_interval_secs(frame.keys());
        let downsample = natural.is_some_and(|n| n < self.resolution.as_secs_f64());
        debug!(?natural, resolution = %self.resolution, downsample, "detrend");
        let trend = if downsample {
            resample_mean(&frame, self.resolution.as_millis())
        } else {
            frame.clone()
        };

        Ok(frame.map_columns(|name, keys, col| {
            let coarse: Vec<(i64, f64)> = trend
                .points(name)
                .into_iter()
                .map(|(k, v)| (k.millis(), v))
                .collect();
            keys.iter()
                .zip(col)
                .map(|(key, value)| {
                    let level = interpolate_clamped(&coarse, key.millis())?;
                    value.map(|v| v - level)
                })
                .collect()
        }))
    }
}

/// Mean series at a resolution, only ever resampling coarse data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningMean {
    resolution: Resolution,
}

impl RunningMean {
    /// Running mean at `resolution`.
    #[must_use]
    pub const fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

impl Preprocessor for RunningMean {
    fn describe(&self) -> String {
        format!("Running mean ({})", self.resolution)
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Timestamp, AxisRole::Value)
    }

    fn process(&self, frame: WideFrame) -> Result<WideFrame> {
        let natural = natural_interval_secs(frame.keys());
        let resample = natural.is_some_and(|n| n > self.resolution.as_secs_f64());
        debug!(?natural, resolution = %self.resolution, resample, "running mean");
        if resample {
            Ok(resample_mean(&frame, self.resolution.as_millis()))
        } else {
            Ok(frame)
        }
    }
}

//! Transformation pipeline
//!
//! A [`Transform`] is a closed set of strategies. Each maps a dataset query
//! to a long-format series plus the roles of its x and y axes:
//!
//! ```text
//! QueryRows ─▶ pivot (WideFrame) ─▶ Preprocessor::process ─▶ melt ─▶ TransformOutput
//! ```
//!
//! | transform        | x         | y     |
//! |------------------|-----------|-------|
//! | Raw              | timestamp | value |
//! | DLI              | day       | value |
//! | Transmissibility | timestamp | value |
//! | Detrend          | timestamp | value |
//! | Running mean     | timestamp | value |
//! | Occurrence count | day       | count |
//!
//! Numeric faults (zero reference, empty resample buckets) are filtered
//! locally. A transform that produces no rows still succeeds and reports an
//! [`Warning::EmptyResult`].

mod detrend;
mod dli;
mod frame;
mod occurrence;
mod resample;
mod transmissibility;

pub use detrend::{Detrend, RunningMean};
pub use dli::{DailyLightIntegral, DEFAULT_DLI_SCALE};
pub use frame::{SeriesRow, TimeKey, WideFrame};
pub use occurrence::OccurrenceCount;
pub use transmissibility::Transmissibility;

use crate::catalog::SensorCatalog;
use crate::config::EngineConfig;
use crate::query::Row;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Unit of a resampling resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Seconds (`seconds`, `s`)
    Seconds,
    /// Minutes (`minutes`, `min`)
    Minutes,
    /// Hours (`hours`, `h`)
    Hours,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "seconds" | "s" => Ok(Self::Seconds),
            "minutes" | "min" => Ok(Self::Minutes),
            "hours" | "h" => Ok(Self::Hours),
            other => Err(Error::param(format!(
                "unknown time unit {other:?}; expected seconds, minutes or hours"
            ))),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        })
    }
}

/// A positive `(quantity, unit)` resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    quantity: u32,
    unit: TimeUnit,
}

impl Resolution {
    /// Create a resolution.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if `quantity` is zero.
    pub fn new(quantity: u32, unit: TimeUnit) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::param("resolution quantity must be positive"));
        }
        Ok(Self { quantity, unit })
    }

    /// Quantity of units.
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit.
    #[must_use]
    pub const fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Length in seconds.
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.quantity) * self.unit.as_secs() as f64
    }

    /// Length in milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        i64::from(self.quantity) * self.unit.as_secs() as i64 * 1000
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.unit)
    }
}

/// Meaning of an output axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisRole {
    /// Measurement instant
    Timestamp,
    /// Calendar day
    Day,
    /// Transformed reading
    Value,
    /// Number of readings
    Count,
}

impl fmt::Display for AxisRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timestamp => "timestamp",
            Self::Day => "day",
            Self::Value => "value",
            Self::Count => "count",
        })
    }
}

/// Non-fatal condition attached to an otherwise successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    /// Zero rows survived filtering or transformation
    EmptyResult {
        /// What produced the empty result
        context: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResult { context } => write!(f, "Empty result: {context} produced no rows"),
        }
    }
}

/// Long-format output of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    /// Human-readable label of the transform
    pub description: String,
    /// Role of the x axis (the time key)
    pub x: AxisRole,
    /// Role of the y axis
    pub y: AxisRole,
    /// `(time key, variable, value)` rows, ordered by key then variable
    pub rows: Vec<SeriesRow>,
    /// Non-fatal conditions
    pub warnings: Vec<Warning>,
}

impl TransformOutput {
    /// Whether no rows were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pivot the rows back to a wide frame.
    #[must_use]
    pub fn to_frame(&self) -> WideFrame {
        WideFrame::from_long(self.rows.iter().cloned())
    }
}

/// One transform strategy working on a pivoted frame.
pub trait Preprocessor {
    /// Label of the transform, as shown next to its output.
    fn describe(&self) -> String;

    /// `(x, y)` roles of the output.
    fn axes(&self) -> (AxisRole, AxisRole);

    /// Transform a timestamp-keyed frame.
    ///
    /// # Errors
    /// Returns error if the frame cannot be transformed.
    fn process(&self, frame: WideFrame) -> Result<WideFrame>;
}

/// Identity transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawData;

impl Preprocessor for RawData {
    fn describe(&self) -> String {
        "Raw Data".to_string()
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Timestamp, AxisRole::Value)
    }

    fn process(&self, frame: WideFrame) -> Result<WideFrame> {
        Ok(frame)
    }
}

/// A transform and exactly the parameters it needs.
///
/// Serializes as a [`TransformSpec`] parameter bag; deserializing goes
/// through the same strict validation as [`Transform::try_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformSpec", into = "TransformSpec")]
pub enum Transform {
    /// Filtered series unchanged
    Raw,
    /// Daily light integral
    Dli,
    /// Ratio against a reference sensor (effective name)
    Transmissibility {
        /// Reference sensor
        reference: String,
    },
    /// Raw minus the moving mean at a resolution
    Detrend {
        /// Moving mean resolution
        resolution: Resolution,
    },
    /// Mean series at a resolution
    RunningMean {
        /// Target resolution
        resolution: Resolution,
    },
    /// Per-day count of readings in `[lower, upper]`
    OccurrenceCount {
        /// Inclusive lower limit
        lower: f64,
        /// Inclusive upper limit
        upper: f64,
    },
}

impl Transform {
    /// Transmissibility against `reference`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for an empty reference name.
    pub fn transmissibility(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.is_empty() {
            return Err(Error::param("transmissibility requires a reference sensor"));
        }
        Ok(Self::Transmissibility { reference })
    }

    /// Detrend at `quantity` `unit`s.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a zero quantity.
    pub fn detrend(quantity: u32, unit: TimeUnit) -> Result<Self> {
        Ok(Self::Detrend {
            resolution: Resolution::new(quantity, unit)?,
        })
    }

    /// Running mean at `quantity` `unit`s.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a zero quantity.
    pub fn running_mean(quantity: u32, unit: TimeUnit) -> Result<Self> {
        Ok(Self::RunningMean {
            resolution: Resolution::new(quantity, unit)?,
        })
    }

    /// Occurrence count in `[lower, upper]`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for non-finite or inverted limits.
    pub fn occurrence_count(lower: f64, upper: f64) -> Result<Self> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(Error::param("occurrence limits must be finite"));
        }
        if lower > upper {
            return Err(Error::param(format!(
                "occurrence lower limit {lower} is above upper limit {upper}"
            )));
        }
        Ok(Self::OccurrenceCount { lower, upper })
    }

    /// Canonical name of the transform.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Dli => "dli",
            Self::Transmissibility { .. } => "tx",
            Self::Detrend { .. } => "detrend",
            Self::RunningMean { .. } => "running_mean",
            Self::OccurrenceCount { .. } => "occurrence_count",
        }
    }

    /// Reference sensor, for transmissibility.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Transmissibility { reference } => Some(reference),
            _ => None,
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn describe(&self) -> String {
        self.preprocessor(DEFAULT_DLI_SCALE).describe()
    }

    /// `(x, y)` roles of the output.
    #[must_use]
    pub fn axes(&self) -> (AxisRole, AxisRole) {
        self.preprocessor(DEFAULT_DLI_SCALE).axes()
    }

    /// Strategy implementing this transform.
    #[must_use]
    pub fn preprocessor(&self, dli_scale: f64) -> Box<dyn Preprocessor> {
        match self {
            Self::Raw => Box::new(RawData),
            Self::Dli => Box::new(DailyLightIntegral::new(dli_scale)),
            Self::Transmissibility { reference } => Box::new(Transmissibility::new(reference.clone())),
            Self::Detrend { resolution } => Box::new(Detrend::new(*resolution)),
            Self::RunningMean { resolution } => Box::new(RunningMean::new(*resolution)),
            Self::OccurrenceCount { lower, upper } => Box::new(OccurrenceCount::new(*lower, *upper)),
        }
    }
}

/// Loose transform parameters, as stored with a plot or sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Transform name
    pub name: String,
    /// Reference sensor (transmissibility)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Resolution quantity (detrend, running mean)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Resolution unit (detrend, running mean)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Lower limit (occurrence count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    /// Upper limit (occurrence count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl TransformSpec {
    /// Bag with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn present(&self) -> Vec<&'static str> {
        [
            ("reference", self.reference.is_some()),
            ("quantity", self.quantity.is_some()),
            ("unit", self.unit.is_some()),
            ("lower", self.lower.is_some()),
            ("upper", self.upper.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect()
    }

    fn only(&self, allowed: &[&str]) -> Result<()> {
        match self.present().into_iter().find(|f| !allowed.contains(f)) {
            Some(extra) => Err(Error::param(format!(
                "parameter {extra} does not apply to transform {}",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn required<T: Clone>(&self, field: &str, value: &Option<T>) -> Result<T> {
        value
            .clone()
            .ok_or_else(|| Error::param(format!("transform {} requires {field}", self.name)))
    }

    fn resolution(&self) -> Result<Resolution> {
        let quantity = self.required("quantity", &self.quantity)?;
        let unit: TimeUnit = self.required("unit", &self.unit)?.parse()?;
        Resolution::new(quantity, unit)
    }
}

impl TryFrom<TransformSpec> for Transform {
    type Error = Error;

    fn try_from(spec: TransformSpec) -> Result<Self> {
        match spec.name.as_str() {
            "raw" | "none" => {
                spec.only(&[])?;
                Ok(Self::Raw)
            }
            "dli" => {
                spec.only(&[])?;
                Ok(Self::Dli)
            }
            "tx" | "transmissibility" => {
                spec.only(&["reference"])?;
                Self::transmissibility(spec.required("reference", &spec.reference)?)
            }
            "detrend" => {
                spec.only(&["quantity", "unit"])?;
                Ok(Self::Detrend {
                    resolution: spec.resolution()?,
                })
            }
            "running_mean" => {
                spec.only(&["quantity", "unit"])?;
                Ok(Self::RunningMean {
                    resolution: spec.resolution()?,
                })
            }
            "occurrence_count" => {
                spec.only(&["lower", "upper"])?;
                Self::occurrence_count(
                    spec.required("lower", &spec.lower)?,
                    spec.required("upper", &spec.upper)?,
                )
            }
            other => Err(Error::param(format!("unknown transform {other:?}"))),
        }
    }
}

impl From<Transform> for TransformSpec {
    fn from(transform: Transform) -> Self {
        let mut spec = Self::named(transform.name());
        match transform {
            Transform::Raw | Transform::Dli => {}
            Transform::Transmissibility { reference } => spec.reference = Some(reference),
            Transform::Detrend { resolution } | Transform::RunningMean { resolution } => {
                spec.quantity = Some(resolution.quantity());
                spec.unit = Some(resolution.unit().to_string());
            }
            Transform::OccurrenceCount { lower, upper } => {
                spec.lower = Some(lower);
                spec.upper = Some(upper);
            }
        }
        spec
    }
}

/// Runs transforms over query rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformationPipeline {
    dli_scale: f64,
}

impl Default for TransformationPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_DLI_SCALE)
    }
}

impl TransformationPipeline {
    /// Pipeline with the given DLI scale factor.
    #[must_use]
    pub const fn new(dli_scale: f64) -> Self {
        Self { dli_scale }
    }

    /// Pipeline configured from the engine configuration.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.dli_scale)
    }

    /// Sensors (effective names) the dataset query must return for `transform`.
    ///
    /// Duplicates are dropped; for transmissibility the reference is appended.
    ///
    /// # Errors
    /// - `InvalidSensorReference` for a sensor or reference the trial lacks
    /// - `InvalidParameter` if the reference is also a target
    pub fn query_sensors(
        &self,
        transform: &Transform,
        catalog: &SensorCatalog,
        sensors: &[String],
    ) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::with_capacity(sensors.len() + 1);
        for name in sensors {
            catalog.resolve(name)?;
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        if let Some(reference) = transform.reference() {
            catalog.resolve(reference)?;
            if names.iter().any(|n| n == reference) {
                return Err(Error::param(format!(
                    "reference sensor {reference} cannot also be a target"
                )));
            }
            names.push(reference.to_string());
        }
        Ok(names)
    }

    /// Pivot `rows`, run the transform and melt the result.
    ///
    /// # Errors
    /// Returns error if the transform fails.
    pub fn apply(
        &self,
        transform: &Transform,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<TransformOutput> {
        let preprocessor = transform.preprocessor(self.dli_scale);
        let frame = WideFrame::pivot(rows);
        debug!(transform = transform.name(), keys = frame.len(), "dispatching transform");

        let description = preprocessor.describe();
        let (x, y) = preprocessor.axes();
        let rows = preprocessor.process(frame)?.melt();

        let mut warnings = Vec::new();
        if rows.is_empty() {
            let warning = Warning::EmptyResult {
                context: description.clone(),
            };
            warn!(transform = transform.name(), "{warning}");
            warnings.push(warning);
        }
        Ok(TransformOutput {
            description,
            x,
            y,
            rows,
            warnings,
        })
    }
}

//! Plot shaping
//!
//! Pure reshaping of a [`TransformOutput`] for presentation; no values are
//! computed here.
//!
//! - **Standard**: the long series as is
//! - **Paired axis**: pivot to wide and pick two variables as x and y; a
//!   variable without data becomes an all-null column
//! - **Group joined**: pair every non-axis sensor with the axis sensor on the
//!   time key, then left-join group values by sensor name for colouring

use crate::model::{DatasetId, GroupRow};
use crate::transform::{TimeKey, Transform, TransformOutput, WideFrame};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Presentation mode of a plot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum PlotFormat {
    /// Long series, time on x
    #[default]
    Standard,
    /// One variable against another
    PairedAxis {
        /// Variable on the x axis
        x: String,
        /// Variable on the y axis
        y: String,
    },
    /// Sensors against an axis sensor, coloured by group value
    GroupJoined {
        /// Sensor on the x axis
        axis_sensor: String,
        /// Group key whose values colour the series
        group_key: String,
    },
}

/// Mark type of a plot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    /// Connected line
    #[default]
    Line,
    /// Unconnected points
    Scatter,
}

/// Stored plot definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    /// Dataset to plot
    pub dataset: DatasetId,
    /// Sensors (effective names)
    pub sensors: Vec<String>,
    /// Transform applied before shaping
    pub transform: Transform,
    /// Presentation mode
    #[serde(default)]
    pub format: PlotFormat,
    /// Mark type
    #[serde(default)]
    pub kind: PlotKind,
    /// Column to colour by, if any
    #[serde(default)]
    pub color: Option<String>,
}

impl PlotSpec {
    /// Standard line plot of `sensors` under `transform`.
    #[must_use]
    pub fn new(dataset: DatasetId, sensors: Vec<String>, transform: Transform) -> Self {
        Self {
            dataset,
            sensors,
            transform,
            format: PlotFormat::Standard,
            kind: PlotKind::Line,
            color: None,
        }
    }

    /// Same plot with another presentation mode.
    #[must_use]
    pub fn with_format(mut self, format: PlotFormat) -> Self {
        self.format = format;
        self
    }

    /// Check the definition before it is stored or rendered.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for an empty sensor list, a reference that
    /// is also a target, or empty axis names.
    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            return Err(Error::param("a plot needs at least one sensor"));
        }
        if let Some(reference) = self.transform.reference() {
            if self.sensors.iter().any(|s| s == reference) {
                return Err(Error::param(format!(
                    "reference sensor {reference} cannot also be plotted"
                )));
            }
        }
        match &self.format {
            PlotFormat::Standard => Ok(()),
            PlotFormat::PairedAxis { x, y } if x.is_empty() || y.is_empty() => {
                Err(Error::param("paired-axis plots need both axis variables"))
            }
            PlotFormat::GroupJoined {
                axis_sensor,
                group_key,
            } if axis_sensor.is_empty() || group_key.is_empty() => {
                Err(Error::param("group-joined plots need an axis sensor and a group key"))
            }
            _ => Ok(()),
        }
    }

    /// Title of the plot as item `index` of a page.
    #[must_use]
    pub fn title(&self, index: usize, dataset_name: &str) -> String {
        format!(
            "Item {index} - Plot - Dataset: {dataset_name} - {}",
            self.transform.describe()
        )
    }
}

/// Wide table with two designated axis columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedAxisTable {
    /// Variable on the x axis
    pub x: String,
    /// Variable on the y axis
    pub y: String,
    /// All variables, pivoted; `x` and `y` are always present
    pub frame: WideFrame,
}

impl PairedAxisTable {
    /// `(key, x, y)` triples, nulls kept.
    #[must_use]
    pub fn points(&self) -> Vec<(TimeKey, Option<f64>, Option<f64>)> {
        let x = self.frame.column(&self.x).unwrap_or_default();
        let y = self.frame.column(&self.y).unwrap_or_default();
        self.frame
            .keys()
            .iter()
            .enumerate()
            .map(|(i, k)| (*k, x.get(i).copied().flatten(), y.get(i).copied().flatten()))
            .collect()
    }
}

/// One reading paired with the axis sensor's reading at the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupJoinedRow {
    /// Time key shared by both readings
    pub key: TimeKey,
    /// Non-axis sensor
    pub variable: String,
    /// Reading of `variable`
    pub value: f64,
    /// Reading of the axis sensor
    pub axis_value: f64,
    /// Value of the sensor's group under the plot's key, if tagged
    pub group_value: Option<String>,
}

/// Output of [`shape`].
#[derive(Debug, Clone, PartialEq)]
pub enum ShapedPlot {
    /// Long series
    Standard(TransformOutput),
    /// Two-variable table
    PairedAxis(PairedAxisTable),
    /// Sensor against axis sensor rows
    GroupJoined(Vec<GroupJoinedRow>),
}

/// Pivot `output` and designate `x` and `y`.
#[must_use]
pub fn paired_axis(output: &TransformOutput, x: &str, y: &str) -> PairedAxisTable {
    let mut frame = output.to_frame();
    frame.ensure_column(x);
    frame.ensure_column(y);
    PairedAxisTable {
        x: x.to_string(),
        y: y.to_string(),
        frame,
    }
}

/// Join every non-axis series with `axis_sensor` on the time key, then
/// left-join `groups` by sensor name.
///
/// `groups` is expected to hold the rows of one group key. A sensor tagged
/// with several values of that key yields one row per value.
#[must_use]
pub fn group_joined(
    output: &TransformOutput,
    axis_sensor: &str,
    groups: &[GroupRow],
) -> Vec<GroupJoinedRow> {
    let axis: FxHashMap<TimeKey, f64> = output
        .rows
        .iter()
        .filter(|r| r.variable == axis_sensor)
        .map(|r| (r.key, r.value))
        .collect();
    let mut tags: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for row in groups {
        tags.entry(row.sensor.as_str()).or_default().push(row.value.as_str());
    }

    let mut joined = Vec::new();
    for row in output.rows.iter().filter(|r| r.variable != axis_sensor) {
        let Some(&axis_value) = axis.get(&row.key) else {
            continue;
        };
        let values: Vec<Option<String>> = match tags.get(row.variable.as_str()) {
            Some(values) => values.iter().map(|v| Some((*v).to_string())).collect(),
            None => vec![None],
        };
        for group_value in values {
            joined.push(GroupJoinedRow {
                key: row.key,
                variable: row.variable.clone(),
                value: row.value,
                axis_value,
                group_value,
            });
        }
    }
    joined
}

/// Apply `format` to a transform output. `groups` is only read in the
/// group-joined mode and is filtered to the format's group key here.
#[must_use]
pub fn shape(output: TransformOutput, format: &PlotFormat, groups: &[GroupRow]) -> ShapedPlot {
    match format {
        PlotFormat::Standard => ShapedPlot::Standard(output),
        PlotFormat::PairedAxis { x, y } => ShapedPlot::PairedAxis(paired_axis(&output, x, y)),
        PlotFormat::GroupJoined {
            axis_sensor,
            group_key,
        } => {
            let keyed: Vec<GroupRow> = groups
                .iter()
                .filter(|g| &g.key == group_key)
                .cloned()
                .collect();
            ShapedPlot::GroupJoined(group_joined(&output, axis_sensor, &keyed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupId;
    use crate::transform::{AxisRole, SeriesRow};
    use chrono::{Duration, TimeZone, Utc};

    fn output(rows: &[(i64, &str, f64)]) -> TransformOutput {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        TransformOutput {
            description: "Raw Data".to_string(),
            x: AxisRole::Timestamp,
            y: AxisRole::Value,
            rows: rows
                .iter()
                .map(|(h, v, x)| SeriesRow {
                    key: TimeKey::Timestamp(t0 + Duration::hours(*h)),
                    variable: (*v).to_string(),
                    value: *x,
                })
                .collect(),
            warnings: Vec::new(),
        }
    }

    fn tag(value: &str, sensor: &str) -> GroupRow {
        GroupRow {
            group_id: GroupId(1),
            key: "zone".to_string(),
            value: value.to_string(),
            sensor: sensor.to_string(),
        }
    }

    #[test]
    fn test_paired_axis_missing_variable_is_null_column() {
        let out = output(&[(0, "A", 1.0), (1, "A", 2.0)]);
        let table = paired_axis(&out, "A", "B");
        let points = table.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].1, Some(1.0));
        assert!(points.iter().all(|p| p.2.is_none()));
    }

    #[test]
    fn test_group_joined_pairs_and_left_joins() {
        let out = output(&[
            (0, "Axis", 10.0),
            (0, "A", 1.0),
            (0, "B", 2.0),
            (1, "A", 3.0),
        ]);
        let rows = group_joined(&out, "Axis", &[tag("north", "A")]);
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.variable == "A").unwrap();
        assert_eq!(a.axis_value, 10.0);
        assert_eq!(a.group_value.as_deref(), Some("north"));
        let b = rows.iter().find(|r| r.variable == "B").unwrap();
        assert_eq!(b.group_value, None);
    }

    #[test]
    fn test_shape_filters_groups_by_key() {
        let out = output(&[(0, "Axis", 1.0), (0, "A", 2.0)]);
        let mut other = tag("PAR", "A");
        other.key = "type".to_string();
        let format = PlotFormat::GroupJoined {
            axis_sensor: "Axis".to_string(),
            group_key: "zone".to_string(),
        };
        let ShapedPlot::GroupJoined(rows) = shape(out, &format, &[other, tag("south", "A")]) else {
            panic!("expected group-joined rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_value.as_deref(), Some("south"));
    }

    #[test]
    fn test_plot_spec_validation() {
        let spec = PlotSpec::new(DatasetId(1), vec![], Transform::Raw);
        assert!(spec.validate().is_err());

        let tx = Transform::transmissibility("Out").unwrap();
        let spec = PlotSpec::new(DatasetId(1), vec!["Out".to_string()], tx);
        assert!(matches!(spec.validate(), Err(Error::InvalidParameter(_))));

        let spec = PlotSpec::new(DatasetId(1), vec!["A".to_string()], Transform::Dli)
            .with_format(PlotFormat::PairedAxis {
                x: "A".to_string(),
                y: String::new(),
            });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_plot_title() {
        let spec = PlotSpec::new(DatasetId(1), vec!["A".to_string()], Transform::Dli);
        assert_eq!(spec.title(2, "Week 1"), "Item 2 - Plot - Dataset: Week 1 - DLI (mol/m2/day)");
    }

    #[test]
    fn test_plot_spec_deserializes_with_defaults() {
        let json = r#"{"dataset": 4, "sensors": ["A"], "transform": {"name": "dli"}}"#;
        let spec: PlotSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.format, PlotFormat::Standard);
        assert_eq!(spec.kind, PlotKind::Line);
        assert_eq!(spec.transform, Transform::Dli);
    }
}

//! Sensor selection filters
//!
//! A selection is an explicit, ordered list of [`FilterSpec`]s carried by the
//! request. Each filter narrows the output of the previous one:
//!
//! ```text
//! catalog ──▶ [group type=PAR] ──▶ [reference name!=P0] ──▶ surviving set
//! ```
//!
//! - `Group`: keep sensors tagged `(key, value)` in the project; a missing
//!   group empties the selection, and a member naming a sensor of the trial
//!   by a name it no longer carries fails the selection
//! - `Attribute`: keep sensors whose attribute equals the value
//! - `Reference`: keep sensors whose attribute differs from the value

use crate::catalog::SensorCatalog;
use crate::model::{Group, Project, Sensor};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, warn};

/// Sensor attribute a filter compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorAttribute {
    /// Raw variable name
    RawName,
    /// Display name (unset never equals anything)
    DisplayName,
    /// Display name if set, else raw name
    EffectiveName,
}

impl SensorAttribute {
    fn read(self, sensor: &Sensor) -> Option<&str> {
        match self {
            Self::RawName => Some(sensor.raw_name()),
            Self::DisplayName => sensor.display_name(),
            Self::EffectiveName => Some(sensor.effective_name()),
        }
    }
}

impl FromStr for SensorAttribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" | "raw_name" => Ok(Self::RawName),
            "display_name" => Ok(Self::DisplayName),
            "effective_name" => Ok(Self::EffectiveName),
            other => Err(Error::param(format!("unknown sensor attribute: {other}"))),
        }
    }
}

/// One step of a sensor selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "filter_type", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Keep sensors tagged by the `(key, value)` group
    Group {
        /// Group key
        key: String,
        /// Group value
        value: String,
    },
    /// Keep sensors where `attribute == value`
    Attribute {
        /// Compared attribute
        attribute: SensorAttribute,
        /// Required value
        value: String,
    },
    /// Keep sensors where `attribute != value`
    Reference {
        /// Compared attribute
        attribute: SensorAttribute,
        /// Rejected value
        value: String,
    },
}

impl FilterSpec {
    /// Group filter shorthand.
    #[must_use]
    pub fn group(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Group {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Reference filter removing one sensor (by effective name) from the pool.
    #[must_use]
    pub fn exclude_sensor(effective_name: impl Into<String>) -> Self {
        Self::Reference {
            attribute: SensorAttribute::EffectiveName,
            value: effective_name.into(),
        }
    }
}

/// Evaluates filter lists against a trial's sensors.
///
/// Group filters look up groups in the project given at construction. Without
/// a project every group filter empties the selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupFilterEngine<'a> {
    project: Option<&'a Project>,
}

impl<'a> GroupFilterEngine<'a> {
    /// Engine resolving group filters against `project`.
    #[must_use]
    pub const fn new(project: &'a Project) -> Self {
        Self {
            project: Some(project),
        }
    }

    /// Engine with no groups configured.
    #[must_use]
    pub const fn without_groups() -> Self {
        Self { project: None }
    }

    /// Effective names of the catalog's sensors that survive `filters`.
    ///
    /// Group members that are not sensors of this trial are ignored, since
    /// project groups span trials.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` if a filtered group still cites a
    /// former name of one of the catalog's sensors.
    pub fn apply(&self, catalog: &SensorCatalog, filters: &[FilterSpec]) -> Result<BTreeSet<String>> {
        let mut surviving: Vec<&Sensor> = catalog.sensors().collect();
        for filter in filters {
            if let FilterSpec::Group { key, value } = filter {
                self.check_group_names(catalog, key, value)?;
            }
            surviving.retain(|sensor| self.keeps(filter, sensor));
            debug!(?filter, surviving = surviving.len(), "applied sensor filter");
            if surviving.is_empty() {
                break;
            }
        }
        Ok(surviving
            .into_iter()
            .map(|s| s.effective_name().to_string())
            .collect())
    }

    /// Check every group under `key` against the catalog's renames.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` if such a group cites a former name
    /// of one of the catalog's sensors.
    pub fn check_key(&self, catalog: &SensorCatalog, key: &str) -> Result<()> {
        self.project
            .map_or(&[][..], Project::groups)
            .iter()
            .filter(|g| g.key() == key)
            .try_for_each(|g| check_members(catalog, g))
    }

    fn check_group_names(&self, catalog: &SensorCatalog, key: &str, value: &str) -> Result<()> {
        self.project
            .and_then(|p| p.group(key, value))
            .map_or(Ok(()), |g| check_members(catalog, g))
    }

    fn keeps(&self, filter: &FilterSpec, sensor: &Sensor) -> bool {
        match filter {
            FilterSpec::Group { key, value } => self
                .project
                .and_then(|p| p.group(key, value))
                .is_some_and(|g| g.sensor_names().contains(sensor.effective_name())),
            FilterSpec::Attribute { attribute, value } => {
                attribute.read(sensor) == Some(value.as_str())
            }
            FilterSpec::Reference { attribute, value } => {
                attribute.read(sensor) != Some(value.as_str())
            }
        }
    }
}

fn check_members(catalog: &SensorCatalog, group: &Group) -> Result<()> {
    for name in group.sensor_names() {
        if let Some(current) = catalog.renamed_to(name) {
            warn!(key = group.key(), value = group.value(), stale = %name, %current, "group cites a renamed sensor");
            return Err(Error::sensor(format!(
                "group {}={} cites {name}, renamed to {current} in {}; resync the group",
                group.key(),
                group.value(),
                catalog.trial()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectId, TrialId};

    fn fixture() -> (SensorCatalog, Project) {
        let mut catalog = SensorCatalog::new(TrialId(1), ["P0", "P1", "P2", "T1"]);
        catalog.rename("P2", Some("Roof")).unwrap();
        let mut project = Project::new(ProjectId(1), "p");
        project.upsert_group("type", "PAR", ["P0", "P1", "Roof"]).unwrap();
        project.upsert_group("zone", "north", ["P1", "T1"]).unwrap();
        (catalog, project)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        assert_eq!(engine.apply(&catalog, &[]).unwrap(), set(&["P0", "P1", "Roof", "T1"]));
    }

    #[test]
    fn test_group_filters_intersect() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        let filters = [FilterSpec::group("type", "PAR"), FilterSpec::group("zone", "north")];
        assert_eq!(engine.apply(&catalog, &filters).unwrap(), set(&["P1"]));
    }

    #[test]
    fn test_missing_group_filters_to_nothing() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        assert!(engine
            .apply(&catalog, &[FilterSpec::group("type", "CO2")])
            .unwrap()
            .is_empty());
        assert!(GroupFilterEngine::without_groups()
            .apply(&catalog, &[FilterSpec::group("type", "PAR")])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reference_filter_removes_reference() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        let filters = [FilterSpec::group("type", "PAR"), FilterSpec::exclude_sensor("P0")];
        assert_eq!(engine.apply(&catalog, &filters).unwrap(), set(&["P1", "Roof"]));
    }

    #[test]
    fn test_attribute_filter_on_display_name() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        let keep_roof = FilterSpec::Attribute {
            attribute: SensorAttribute::DisplayName,
            value: "Roof".to_string(),
        };
        assert_eq!(engine.apply(&catalog, &[keep_roof]).unwrap(), set(&["Roof"]));

        let by_raw = FilterSpec::Attribute {
            attribute: SensorAttribute::RawName,
            value: "P2".to_string(),
        };
        assert_eq!(engine.apply(&catalog, &[by_raw]).unwrap(), set(&["Roof"]));
    }

    #[test]
    fn test_order_matters_only_through_narrowing() {
        let (catalog, project) = fixture();
        let engine = GroupFilterEngine::new(&project);
        let a = [FilterSpec::exclude_sensor("P1"), FilterSpec::group("zone", "north")];
        let b = [FilterSpec::group("zone", "north"), FilterSpec::exclude_sensor("P1")];
        assert_eq!(engine.apply(&catalog, &a).unwrap(), set(&["T1"]));
        assert_eq!(engine.apply(&catalog, &a).unwrap(), engine.apply(&catalog, &b).unwrap());
    }

    #[test]
    fn test_group_citing_renamed_sensor_fails() {
        let (mut catalog, project) = fixture();
        catalog.rename("P1", Some("Wall")).unwrap();
        let engine = GroupFilterEngine::new(&project);

        let err = engine
            .apply(&catalog, &[FilterSpec::group("type", "PAR")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSensorReference(_)));
        assert!(err.to_string().contains("renamed to Wall"));

        // non-group filters never look at group members
        let filters = [FilterSpec::exclude_sensor("P0")];
        assert_eq!(engine.apply(&catalog, &filters).unwrap(), set(&["Roof", "T1", "Wall"]));
    }

    #[test]
    fn test_group_resync_restores_matching() {
        let (mut catalog, mut project) = fixture();
        catalog.rename("P1", Some("Wall")).unwrap();
        assert_eq!(project.resync_sensor_name("P1", "Wall"), 2);
        let engine = GroupFilterEngine::new(&project);
        let filters = [FilterSpec::group("type", "PAR")];
        assert_eq!(engine.apply(&catalog, &filters).unwrap(), set(&["P0", "Roof", "Wall"]));
    }

    #[test]
    fn test_group_members_from_other_trials_are_ignored() {
        let (catalog, mut project) = fixture();
        project.upsert_group("type", "PAR", ["Elsewhere"]).unwrap();
        let engine = GroupFilterEngine::new(&project);
        let filters = [FilterSpec::group("type", "PAR")];
        assert_eq!(engine.apply(&catalog, &filters).unwrap(), set(&["P0", "P1", "Roof"]));
    }

    #[test]
    fn test_filter_spec_deserializes_tagged() {
        let json = r#"[
            {"filter_type": "group", "key": "type", "value": "PAR"},
            {"filter_type": "reference", "attribute": "effective_name", "value": "P0"}
        ]"#;
        let filters: Vec<FilterSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(filters[0], FilterSpec::group("type", "PAR"));
        assert_eq!(filters[1], FilterSpec::exclude_sensor("P0"));
    }

    #[test]
    fn test_attribute_from_str() {
        assert_eq!("name".parse::<SensorAttribute>().unwrap(), SensorAttribute::RawName);
        assert!("colour".parse::<SensorAttribute>().is_err());
    }
}

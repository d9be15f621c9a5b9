//! Sensor catalog: raw variable names ↔ effective names of one trial
//!
//! Renaming only changes the catalog; the fact log keeps raw names. Every
//! external-facing name (queries, groups, exclusions, output columns) is an
//! effective name and is resolved to a raw name here.
//!
//! The catalog also remembers effective names a sensor gave up on rename, so
//! references still citing them can be told apart from names that never
//! belonged to the trial.

use crate::model::{Sensor, TrialId};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Outcome of [`SensorCatalog::apply_readings_map`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadingsMapReport {
    /// Existing sensors whose display name changed
    pub updated: usize,
    /// Sensors created for unknown raw names
    pub created: usize,
}

/// Sensors of one trial, keyed by raw name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCatalog {
    trial: TrialId,
    sensors: BTreeMap<String, Sensor>,
    by_effective: BTreeMap<String, String>,
    former: BTreeMap<String, String>,
}

impl SensorCatalog {
    /// Catalog with one undecorated sensor per raw name.
    #[must_use]
    pub fn new(trial: TrialId, raw_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let sensors: BTreeMap<String, Sensor> = raw_names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), Sensor::new(name))
            })
            .collect();
        let by_effective = sensors.keys().map(|k| (k.clone(), k.clone())).collect();
        Self {
            trial,
            sensors,
            by_effective,
            former: BTreeMap::new(),
        }
    }

    /// Catalog from fully specified sensors.
    ///
    /// # Errors
    /// Returns `ConstraintViolation` on a duplicate raw or effective name.
    pub fn from_sensors(trial: TrialId, sensors: impl IntoIterator<Item = Sensor>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for sensor in sensors {
            let raw = sensor.raw_name().to_string();
            if map.insert(raw.clone(), sensor).is_some() {
                return Err(Error::ConstraintViolation(format!(
                    "duplicate sensor name {raw} in {trial}"
                )));
            }
        }
        let by_effective = index_effective(trial, &map)?;
        Ok(Self {
            trial,
            sensors: map,
            by_effective,
            former: BTreeMap::new(),
        })
    }

    /// Owning trial.
    #[must_use]
    pub const fn trial(&self) -> TrialId {
        self.trial
    }

    /// Number of sensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether the catalog has no sensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// All sensors, ordered by raw name.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    /// Sensor with the given raw name.
    #[must_use]
    pub fn by_raw(&self, raw: &str) -> Option<&Sensor> {
        self.sensors.get(raw)
    }

    /// Effective name of the sensor with the given raw name.
    #[must_use]
    pub fn effective_name_of(&self, raw: &str) -> Option<&str> {
        self.sensors.get(raw).map(Sensor::effective_name)
    }

    /// All effective names.
    #[must_use]
    pub fn effective_names(&self) -> BTreeSet<String> {
        self.by_effective.keys().cloned().collect()
    }

    /// Resolve an effective name to its sensor.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` if no sensor of the trial carries the name.
    pub fn resolve(&self, effective: &str) -> Result<&Sensor> {
        self.by_effective
            .get(effective)
            .and_then(|raw| self.sensors.get(raw))
            .ok_or_else(|| match self.renamed_to(effective) {
                Some(current) => Error::sensor(format!(
                    "{effective} was renamed to {current} in {}",
                    self.trial
                )),
                None => Error::sensor(format!("{effective} is not a sensor of {}", self.trial)),
            })
    }

    /// Resolve effective names to raw names.
    ///
    /// # Errors
    /// Returns `InvalidSensorReference` on the first unknown name.
    pub fn resolve_all<'a>(
        &self,
        effective: impl IntoIterator<Item = &'a str>,
    ) -> Result<BTreeSet<String>> {
        effective
            .into_iter()
            .map(|name| self.resolve(name).map(|s| s.raw_name().to_string()))
            .collect()
    }

    /// Current effective name of the sensor that used to carry `name`.
    ///
    /// `None` if `name` is a current effective name or was never used here.
    #[must_use]
    pub fn renamed_to(&self, name: &str) -> Option<&str> {
        if self.by_effective.contains_key(name) {
            return None;
        }
        self.former
            .get(name)
            .and_then(|raw| self.effective_name_of(raw))
    }

    /// Set or clear the display name of one sensor.
    ///
    /// # Errors
    /// - `InvalidSensorReference` if `raw` is unknown
    /// - `ConstraintViolation` if the new effective name is taken; nothing changes
    pub fn rename(&mut self, raw: &str, display_name: Option<&str>) -> Result<()> {
        if !self.sensors.contains_key(raw) {
            return Err(Error::sensor(format!("{raw} is not a sensor of {}", self.trial)));
        }
        self.apply_readings_map([(raw.to_string(), display_name.map(str::to_string))])
            .map(|_| ())
    }

    /// Apply a `(raw name, display name)` map in one step.
    ///
    /// Known raw names get their display name replaced; unknown raw names
    /// become new sensors. Either the whole map is applied or nothing is.
    ///
    /// # Errors
    /// Returns `ConstraintViolation` if the result would repeat an effective name.
    pub fn apply_readings_map(
        &mut self,
        entries: impl IntoIterator<Item = (String, Option<String>)>,
    ) -> Result<ReadingsMapReport> {
        let mut next = self.sensors.clone();
        let mut report = ReadingsMapReport::default();
        for (raw, display) in entries {
            if let Some(sensor) = next.get_mut(&raw) {
                let before = sensor.display_name().map(str::to_string);
                sensor.set_display_name(display);
                if sensor.display_name().map(str::to_string) != before {
                    report.updated += 1;
                }
            } else {
                let mut sensor = Sensor::new(raw.clone());
                sensor.set_display_name(display);
                next.insert(raw, sensor);
                report.created += 1;
            }
        }
        let by_effective = index_effective(self.trial, &next)?;
        for (name, raw) in &self.by_effective {
            if !by_effective.contains_key(name) {
                self.former.insert(name.clone(), raw.clone());
            }
        }
        self.former.retain(|name, _| !by_effective.contains_key(name));
        self.sensors = next;
        self.by_effective = by_effective;
        debug!(trial = %self.trial, updated = report.updated, created = report.created, "applied readings map");
        Ok(report)
    }

    /// Current `(raw name, display name)` pairs, ordered by raw name.
    #[must_use]
    pub fn readings_map(&self) -> Vec<(String, Option<String>)> {
        self.sensors
            .values()
            .map(|s| (s.raw_name().to_string(), s.display_name().map(str::to_string)))
            .collect()
    }
}

fn index_effective(trial: TrialId, sensors: &BTreeMap<String, Sensor>) -> Result<BTreeMap<String, String>> {
    let mut index = BTreeMap::new();
    for sensor in sensors.values() {
        let effective = sensor.effective_name().to_string();
        if let Some(other) = index.insert(effective.clone(), sensor.raw_name().to_string()) {
            return Err(Error::ConstraintViolation(format!(
                "effective name {effective} used by both {other} and {} in {trial}",
                sensor.raw_name()
            )));
        }
    }
    Ok(index)
}

//! # trialscope: exclusion-aware views over sensor trial logs
//!
//! A trial is an append-only log of `(timestamp, variable, value)` readings.
//! Analysts carve datasets out of it (a time window plus exclusion rules),
//! select sensors through group and attribute filters, and derive secondary
//! series (daily light integral, transmissibility, detrending, running mean,
//! occurrence counts) for plotting and CSV export.
//!
//! ## Data flow
//!
//! ```text
//! MeasurementStore ─▶ QueryBuilder ─▶ TransformationPipeline ─▶ shape / export
//!        ▲                 ▲
//! SensorCatalog   GroupFilterEngine + ExclusionIndex
//! ```
//!
//! Reads run over point-in-time snapshots and are recomputed on every call.
//! Edits to a dataset's exclusions go through [`exclusion::ExclusionReconciler`]
//! and are committed as one atomic unit.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use trialscope::model::Dataset;
//! use trialscope::query::QueryRequest;
//! use trialscope::storage::Measurement;
//! use trialscope::TrialScope;
//!
//! let scope = TrialScope::builder().build()?;
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
//! let facts = (0..10)
//!     .map(|h| Measurement::new(t0 + Duration::hours(h), "A", h as f64))
//!     .collect();
//!
//! let repo = scope.repository();
//! let trial = repo.create_trial("greenhouse-1", None, facts)?;
//! let window = repo.trial(trial)?.span().covering_window();
//! let dataset = repo.create_dataset(Dataset::builder("spring", trial, window).build())?;
//!
//! let rows: Vec<_> = scope.query(dataset, &QueryRequest::all())?.collect();
//! assert_eq!(rows.len(), 10);
//! # Ok::<(), trialscope::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod export;
pub mod filter;
pub mod model;
pub mod query;
pub mod repository;
pub mod shape;
pub mod storage;
pub mod transform;

pub use error::{Error, Result};

use crate::catalog::SensorCatalog;
use crate::config::EngineConfig;
use crate::exclusion::{EditedRow, ExclusionReconciler, ReconcilePlan};
use crate::export::{CsvExporter, ProjectPart};
use crate::filter::GroupFilterEngine;
use crate::model::{DatasetId, Exclusion, ProjectId, TimeWindow, TrialId};
use crate::query::{QueryBuilder, QueryRequest, QueryRows};
use crate::repository::Repository;
use crate::shape::{PlotFormat, PlotSpec, ShapedPlot};
use crate::transform::{Transform, TransformOutput, TransformationPipeline};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Engine instance: records, transforms and export under one configuration.
#[derive(Debug)]
pub struct TrialScope {
    config: EngineConfig,
    repository: Repository,
    pipeline: TransformationPipeline,
    exporter: CsvExporter,
}

impl TrialScope {
    /// Create a new engine builder
    #[must_use]
    pub fn builder() -> TrialScopeBuilder {
        TrialScopeBuilder::default()
    }

    /// Install a `tracing` subscriber honouring `RUST_LOG`, else the
    /// configured `log_filter`.
    ///
    /// Returns `false` if a global subscriber was already installed.
    #[must_use]
    pub fn init_tracing(config: &EngineConfig) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Records of trials, datasets and projects.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Rows of a dataset: its window and exclusions, restricted to the
    /// requested and filtered sensors.
    ///
    /// # Errors
    /// - `NotFound` for an unknown dataset or project
    /// - `InvalidSensorReference` for a requested sensor the trial lacks, or
    ///   a persisted exclusion or filtered group naming a stale sensor
    ///
    /// An empty result is not an error; see [`QueryRows::warning`].
    pub fn query(&self, dataset: DatasetId, request: &QueryRequest) -> Result<QueryRows> {
        let (dataset, exclusions) = self.repository.dataset_snapshot(dataset)?;
        let trial = dataset.trial_id();
        let catalog = self.repository.catalog(trial)?;
        let sensors = self.select_sensors(&catalog, request)?;
        QueryBuilder::new(self.repository.facts(trial)?, &catalog)
            .window(dataset.window())
            .sensors(&sensors)
            .exclusions(&exclusions)
            .build()
    }

    /// Rows of a trial inside an arbitrary window, under ad-hoc exclusions.
    ///
    /// `sensors` of `None` selects every sensor of the trial.
    ///
    /// # Errors
    /// - `NotFound` for an unknown trial
    /// - `InvalidSensorReference` for an unknown sensor name
    pub fn query_window(
        &self,
        trial: TrialId,
        window: TimeWindow,
        sensors: Option<&[String]>,
        exclusions: &[Exclusion],
    ) -> Result<QueryRows> {
        let catalog = self.repository.catalog(trial)?;
        let mut builder = QueryBuilder::new(self.repository.facts(trial)?, &catalog)
            .window(window)
            .exclusions(exclusions);
        if let Some(sensors) = sensors {
            builder = builder.sensors(sensors);
        }
        builder.build()
    }

    /// Number of rows the dataset query returns for `sensors`.
    ///
    /// # Errors
    /// Same as [`TrialScope::query`].
    pub fn row_count(&self, dataset: DatasetId, sensors: &[String]) -> Result<usize> {
        Ok(self
            .query(dataset, &QueryRequest::sensors(sensors.iter().cloned()))?
            .count())
    }

    /// Run `transform` over the dataset rows of `sensors`.
    ///
    /// For transmissibility the reference sensor is queried alongside the
    /// targets and dropped from the output.
    ///
    /// # Errors
    /// - `NotFound` for an unknown dataset
    /// - `InvalidSensorReference` for a sensor or reference the trial lacks
    /// - `InvalidParameter` if the reference is also a target
    pub fn transform(
        &self,
        dataset: DatasetId,
        transform: &Transform,
        sensors: &[String],
    ) -> Result<TransformOutput> {
        let (record, exclusions) = self.repository.dataset_snapshot(dataset)?;
        let trial = record.trial_id();
        let catalog = self.repository.catalog(trial)?;
        let names = self.pipeline.query_sensors(transform, &catalog, sensors)?;
        let rows = QueryBuilder::new(self.repository.facts(trial)?, &catalog)
            .window(record.window())
            .sensors(&names)
            .exclusions(&exclusions)
            .build()?;
        debug!(%dataset, transform = transform.name(), sensors = names.len(), "running transform");
        self.pipeline.apply(transform, rows)
    }

    /// Diff an edited exclusion table against the dataset's persisted set.
    ///
    /// Nothing is written; pass the plan to [`TrialScope::commit_reconciliation`].
    ///
    /// # Errors
    /// - `NotFound` for an unknown dataset
    /// - `MalformedExclusion` or `InvalidSensorReference` for a bad edited row
    pub fn reconcile_exclusions(
        &self,
        dataset: DatasetId,
        edited: &[EditedRow],
    ) -> Result<ReconcilePlan> {
        let (record, persisted) = self.repository.dataset_snapshot(dataset)?;
        let catalog = self.repository.catalog(record.trial_id())?;
        ExclusionReconciler::new(&catalog).reconcile(&persisted, edited)
    }

    /// Apply a reconciliation plan atomically; returns the new exclusion set.
    ///
    /// # Errors
    /// See [`Repository::commit_reconciliation`].
    pub fn commit_reconciliation(
        &self,
        dataset: DatasetId,
        plan: &ReconcilePlan,
    ) -> Result<Vec<Exclusion>> {
        self.repository.commit_reconciliation(dataset, plan)
    }

    /// Transform a dataset and write it as a wide CSV table.
    ///
    /// # Errors
    /// Returns error if the transform or writing fails.
    pub fn export_csv<W: Write>(
        &self,
        dataset: DatasetId,
        transform: &Transform,
        sensors: &[String],
        writer: W,
    ) -> Result<()> {
        let output = self.transform(dataset, transform, sensors)?;
        self.exporter.write(&output, writer)
    }

    /// Transform a dataset and write the CSV table to `path`.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be created, else as [`TrialScope::export_csv`].
    pub fn export_csv_file<P: AsRef<Path>>(
        &self,
        dataset: DatasetId,
        transform: &Transform,
        sensors: &[String],
        path: P,
    ) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.export_csv(dataset, transform, sensors, std::io::BufWriter::new(file))
    }

    /// Export every dataset of a project as one table keyed by time key,
    /// trial and dataset.
    ///
    /// `sensors` of `None` takes every sensor of each dataset's trial,
    /// except a transmissibility reference.
    ///
    /// # Errors
    /// Returns error if a record is missing or a transform fails.
    pub fn export_project_csv<W: Write>(
        &self,
        project: ProjectId,
        transform: &Transform,
        sensors: Option<&[String]>,
        writer: W,
    ) -> Result<()> {
        let project = self.repository.project(project)?;
        let mut parts = Vec::with_capacity(project.datasets().len());
        for dataset in project.datasets() {
            let record = self.repository.dataset(*dataset)?;
            let trial = self.repository.trial(record.trial_id())?;
            let names: Vec<String> = match sensors {
                Some(names) => names.to_vec(),
                None => self
                    .repository
                    .catalog(record.trial_id())?
                    .effective_names()
                    .into_iter()
                    .filter(|name| Some(name.as_str()) != transform.reference())
                    .collect(),
            };
            let output = self.transform(*dataset, transform, &names)?;
            parts.push((trial.name().to_string(), record.name().to_string(), output));
        }
        let parts: Vec<ProjectPart<'_>> = parts
            .iter()
            .map(|(trial, dataset, output)| ProjectPart {
                trial,
                dataset,
                output,
            })
            .collect();
        self.exporter.write_project(&parts, writer)
    }

    /// Transform and shape the data of a plot.
    ///
    /// Group-joined plots query their axis sensor too and take group tags
    /// from `project`; without a project no sensor carries a group value.
    ///
    /// # Errors
    /// - `InvalidParameter` for an invalid plot
    /// - `InvalidSensorReference` if a group under the key cites a renamed sensor
    /// - else as [`TrialScope::transform`]
    pub fn render_plot(&self, plot: &PlotSpec, project: Option<ProjectId>) -> Result<ShapedPlot> {
        plot.validate()?;
        let mut sensors = plot.sensors.clone();
        let mut groups = Vec::new();
        if let PlotFormat::GroupJoined {
            axis_sensor,
            group_key,
        } = &plot.format
        {
            if !sensors.contains(axis_sensor) {
                sensors.push(axis_sensor.clone());
            }
            if let Some(project) = project {
                let trial = self.repository.dataset(plot.dataset)?.trial_id();
                let catalog = self.repository.catalog(trial)?;
                let project = self.repository.project(project)?;
                GroupFilterEngine::new(&project).check_key(&catalog, group_key)?;
                groups = project.group_rows_for(&catalog.effective_names(), Some(group_key));
            }
        }
        let output = self.transform(plot.dataset, &plot.transform, &sensors)?;
        Ok(shape::shape(output, &plot.format, &groups))
    }

    fn select_sensors(&self, catalog: &SensorCatalog, request: &QueryRequest) -> Result<Vec<String>> {
        let requested: Vec<String> = match &request.sensors {
            Some(names) => {
                for name in names {
                    catalog.resolve(name)?;
                }
                names.clone()
            }
            None => catalog.effective_names().into_iter().collect(),
        };
        if request.filters.is_empty() {
            return Ok(requested);
        }
        let project = request
            .project
            .map(|id| self.repository.project(id))
            .transpose()?;
        let engine = project
            .as_ref()
            .map_or_else(GroupFilterEngine::without_groups, GroupFilterEngine::new);
        let surviving = engine.apply(catalog, &request.filters)?;
        Ok(requested
            .into_iter()
            .filter(|name| surviving.contains(name))
            .collect())
    }
}

/// Engine builder
#[derive(Debug, Default)]
pub struct TrialScopeBuilder {
    config: EngineConfig,
}

impl TrialScopeBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a JSON file.
    ///
    /// # Errors
    /// Returns `Io` or `InvalidParameter` as [`EngineConfig::from_json_file`].
    pub fn config_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        Ok(self.config(EngineConfig::from_json_file(path)?))
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the configuration is invalid
    pub fn build(self) -> Result<TrialScope> {
        self.config.validate()?;
        Ok(TrialScope {
            pipeline: TransformationPipeline::from_config(&self.config),
            exporter: CsvExporter::new(&self.config),
            repository: Repository::new(),
            config: self.config,
        })
    }
}

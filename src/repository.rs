//! In-memory record repository
//!
//! Holds the records around the fact log: trials and their sensor catalogs,
//! datasets with their exclusions, and projects. Identities come from one
//! monotonically increasing counter shared by every record kind.
//!
//! ## Consistency
//!
//! - Names of trials, datasets and projects are unique; a name is reserved
//!   in a per-kind index under its entry lock before the record is stored
//! - A dataset's exclusion set is replaced as a whole under the dataset's
//!   entry lock; a failed reconciliation leaves the previous set in place
//! - Deleting a trial deletes its facts, catalog and datasets, and detaches
//!   those datasets from every project

use crate::catalog::SensorCatalog;
use crate::exclusion::ReconcilePlan;
use crate::model::{
    Dataset, DatasetId, Exclusion, ExclusionId, Project, ProjectId, Trial, TrialId,
};
use crate::storage::{Measurement, MeasurementStore, TrialLog};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct DatasetEntry {
    dataset: Dataset,
    exclusions: Vec<Exclusion>,
}

/// Records of trials, datasets and projects.
#[derive(Debug)]
pub struct Repository {
    next_id: AtomicU64,
    facts: MeasurementStore,
    trials: DashMap<TrialId, Trial>,
    catalogs: DashMap<TrialId, SensorCatalog>,
    datasets: DashMap<DatasetId, DatasetEntry>,
    projects: DashMap<ProjectId, Project>,
    trial_names: DashMap<String, TrialId>,
    dataset_names: DashMap<String, DatasetId>,
    project_names: DashMap<String, ProjectId>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            facts: MeasurementStore::new(),
            trials: DashMap::new(),
            catalogs: DashMap::new(),
            datasets: DashMap::new(),
            projects: DashMap::new(),
            trial_names: DashMap::new(),
            dataset_names: DashMap::new(),
            project_names: DashMap::new(),
        }
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn dataset_name_taken(name: &str) -> Error {
        Error::ConstraintViolation(format!("dataset name {name} is taken"))
    }

    // ---- trials -----------------------------------------------------------

    /// Create a trial from its complete set of readings.
    ///
    /// The span is derived from the readings and one undecorated sensor is
    /// created per distinct variable.
    ///
    /// # Errors
    /// - `ConstraintViolation` for a taken name or a duplicate reading
    /// - `InvalidParameter` for no readings or a non-finite reading
    pub fn create_trial(
        &self,
        name: &str,
        notes: Option<&str>,
        facts: Vec<Measurement>,
    ) -> Result<TrialId> {
        let id = reserve_name(&self.trial_names, name, || TrialId(self.allocate()))
            .ok_or_else(|| Error::ConstraintViolation(format!("trial name {name} is taken")))?;
        let span = match self.facts.create_trial(id, facts) {
            Ok(span) => span,
            Err(e) => {
                self.trial_names.remove(name);
                return Err(e);
            }
        };
        let variables = self
            .facts
            .snapshot(id)
            .map(|log| log.variables())
            .unwrap_or_default();
        self.catalogs.insert(id, SensorCatalog::new(id, variables));
        let trial = Trial::new(id, name, span);
        let trial = match notes {
            Some(notes) => trial.with_notes(notes),
            None => trial,
        };
        self.trials.insert(id, trial);
        info!(trial = %id, name, start = %span.start, end = %span.end, "created trial");
        Ok(id)
    }

    /// Trial record.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trial.
    pub fn trial(&self, id: TrialId) -> Result<Trial> {
        self.trials
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All trials, ordered by identity.
    #[must_use]
    pub fn trials(&self) -> Vec<Trial> {
        let mut trials: Vec<Trial> = self.trials.iter().map(|t| t.value().clone()).collect();
        trials.sort_by_key(Trial::id);
        trials
    }

    /// Point-in-time snapshot of a trial's fact log.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trial.
    pub fn facts(&self, id: TrialId) -> Result<Arc<TrialLog>> {
        self.facts
            .snapshot(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Copy of a trial's sensor catalog.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trial.
    pub fn catalog(&self, id: TrialId) -> Result<SensorCatalog> {
        self.catalogs
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Change a trial's catalog in place.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trial, or whatever `edit` returns.
    pub fn update_catalog<T>(
        &self,
        id: TrialId,
        edit: impl FnOnce(&mut SensorCatalog) -> Result<T>,
    ) -> Result<T> {
        let mut catalog = self
            .catalogs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        edit(catalog.value_mut())
    }

    /// Delete a trial with its facts, sensors and datasets.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trial.
    pub fn delete_trial(&self, id: TrialId) -> Result<()> {
        let Some((_, trial)) = self.trials.remove(&id) else {
            return Err(Error::NotFound(id.to_string()));
        };
        self.trial_names.remove(trial.name());
        let owned: Vec<DatasetId> = self
            .datasets
            .iter()
            .filter(|e| e.dataset.trial_id() == id)
            .map(|e| *e.key())
            .collect();
        for dataset in &owned {
            self.remove_dataset(*dataset);
        }
        self.catalogs.remove(&id);
        self.facts.delete_trial(id);
        info!(trial = %id, datasets = owned.len(), "deleted trial");
        Ok(())
    }

    // ---- datasets ---------------------------------------------------------

    /// Store a new dataset (as built by [`Dataset::builder`]).
    ///
    /// # Errors
    /// - `NotFound` if the trial does not exist
    /// - `InvalidParameter` if the window reaches outside the trial's span
    /// - `ConstraintViolation` for a taken name
    pub fn create_dataset(&self, dataset: Dataset) -> Result<DatasetId> {
        let trial = self.trial(dataset.trial_id())?;
        if !trial.span().covering_window().encloses(&dataset.window()) {
            return Err(Error::param(format!(
                "dataset window {} - {} is outside the span of {}",
                dataset.window().start,
                dataset.window().end,
                trial.name()
            )));
        }
        let name = dataset.name().to_string();
        self.insert_dataset(dataset, name, Vec::new())
    }

    fn insert_dataset(
        &self,
        dataset: Dataset,
        name: String,
        exclusions: Vec<Exclusion>,
    ) -> Result<DatasetId> {
        let id = reserve_name(&self.dataset_names, &name, || DatasetId(self.allocate()))
            .ok_or_else(|| Self::dataset_name_taken(&name))?;
        self.store_dataset(id, dataset, name, exclusions);
        Ok(id)
    }

    fn store_dataset(
        &self,
        id: DatasetId,
        dataset: Dataset,
        name: String,
        exclusions: Vec<Exclusion>,
    ) {
        let dataset = dataset.assign(id, name);
        debug!(dataset = %id, name = dataset.name(), trial = %dataset.trial_id(), "created dataset");
        self.datasets.insert(
            id,
            DatasetEntry {
                dataset,
                exclusions,
            },
        );
    }

    /// Dataset record.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown dataset.
    pub fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.datasets
            .get(&id)
            .map(|e| e.dataset.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Persisted exclusions of a dataset, ordered by identity.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown dataset.
    pub fn exclusions(&self, id: DatasetId) -> Result<Vec<Exclusion>> {
        self.datasets
            .get(&id)
            .map(|e| e.exclusions.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Dataset and its exclusions read under one lock.
    pub(crate) fn dataset_snapshot(&self, id: DatasetId) -> Result<(Dataset, Vec<Exclusion>)> {
        self.datasets
            .get(&id)
            .map(|e| (e.dataset.clone(), e.exclusions.clone()))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Datasets over a trial, ordered by identity.
    #[must_use]
    pub fn datasets_of_trial(&self, trial: TrialId) -> Vec<Dataset> {
        let mut datasets: Vec<Dataset> = self
            .datasets
            .iter()
            .filter(|e| e.dataset.trial_id() == trial)
            .map(|e| e.dataset.clone())
            .collect();
        datasets.sort_by_key(Dataset::id);
        datasets
    }

    /// Copy a dataset with its window, notes and exclusions.
    ///
    /// The copy is named after the source if that name is free, else
    /// `{name}_1`, `{name}_2`, ... Copied exclusions get new identities.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown dataset.
    pub fn clone_dataset(&self, id: DatasetId) -> Result<DatasetId> {
        let (source, exclusions) = self.dataset_snapshot(id)?;
        let base = source.name().to_string();
        let (copy, name) = std::iter::once(base.clone())
            .chain((1..).map(|n| format!("{base}_{n}")))
            .find_map(|candidate| {
                reserve_name(&self.dataset_names, &candidate, || DatasetId(self.allocate()))
                    .map(|copy| (copy, candidate))
            })
            .ok_or_else(|| Self::dataset_name_taken(&base))?;
        let exclusions = exclusions
            .into_iter()
            .map(|e| e.with_id(ExclusionId(self.allocate())))
            .collect();
        self.store_dataset(copy, source, name, exclusions);
        info!(source = %id, copy = %copy, "cloned dataset");
        Ok(copy)
    }

    /// Delete a dataset and its exclusions; projects drop their association.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown dataset.
    pub fn delete_dataset(&self, id: DatasetId) -> Result<()> {
        if self.remove_dataset(id) {
            Ok(())
        } else {
            Err(Error::NotFound(id.to_string()))
        }
    }

    fn remove_dataset(&self, id: DatasetId) -> bool {
        let Some((_, entry)) = self.datasets.remove(&id) else {
            return false;
        };
        self.dataset_names.remove(entry.dataset.name());
        for mut project in self.projects.iter_mut() {
            project.detach_dataset(id);
        }
        true
    }

    /// Apply a reconciliation plan to a dataset's exclusions atomically.
    ///
    /// The new exclusion set is computed aside and swapped in only if every
    /// operation succeeds; readers see either the old or the new set.
    ///
    /// # Errors
    /// - `NotFound` for an unknown dataset
    /// - `ConstraintViolation` if the plan does not match the persisted set;
    ///   the persisted set is unchanged
    pub fn commit_reconciliation(&self, id: DatasetId, plan: &ReconcilePlan) -> Result<Vec<Exclusion>> {
        let mut entry = self
            .datasets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        match plan.apply(&entry.exclusions, || ExclusionId(self.allocate())) {
            Ok(next) => {
                entry.exclusions = next.clone();
                info!(
                    dataset = %id,
                    updates = plan.updates.len(),
                    inserts = plan.inserts.len(),
                    deletes = plan.deletes.len(),
                    "committed exclusion reconciliation"
                );
                Ok(next)
            }
            Err(e) => {
                warn!(dataset = %id, error = %e, "rolled back exclusion reconciliation");
                Err(e)
            }
        }
    }

    // ---- projects ---------------------------------------------------------

    /// Create an empty project.
    ///
    /// # Errors
    /// Returns `ConstraintViolation` for a taken name.
    pub fn create_project(&self, name: &str) -> Result<ProjectId> {
        let id = reserve_name(&self.project_names, name, || ProjectId(self.allocate()))
            .ok_or_else(|| Error::ConstraintViolation(format!("project name {name} is taken")))?;
        self.projects.insert(id, Project::new(id, name));
        debug!(project = %id, name, "created project");
        Ok(id)
    }

    /// Project record.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown project.
    pub fn project(&self, id: ProjectId) -> Result<Project> {
        self.projects
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Change a project in place.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown project, or whatever `edit` returns.
    pub fn update_project<T>(
        &self,
        id: ProjectId,
        edit: impl FnOnce(&mut Project) -> Result<T>,
    ) -> Result<T> {
        let mut project = self
            .projects
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        edit(project.value_mut())
    }

    /// Associate a dataset with a project.
    ///
    /// # Errors
    /// Returns `NotFound` if either record is unknown.
    pub fn attach_dataset(&self, project: ProjectId, dataset: DatasetId) -> Result<()> {
        if !self.datasets.contains_key(&dataset) {
            return Err(Error::NotFound(dataset.to_string()));
        }
        self.update_project(project, |p| {
            p.attach_dataset(dataset);
            Ok(())
        })
    }

    /// Delete a project. Its datasets are only detached, never deleted.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown project.
    pub fn delete_project(&self, id: ProjectId) -> Result<()> {
        let (_, project) = self
            .projects
            .remove(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.project_names.remove(project.name());
        Ok(())
    }
}

/// Claim `name` in `index`, allocating the identity only if it was free.
fn reserve_name<I: Copy>(
    index: &DashMap<String, I>,
    name: &str,
    allocate: impl FnOnce() -> I,
) -> Option<I> {
    match index.entry(name.to_string()) {
        Entry::Occupied(_) => None,
        Entry::Vacant(slot) => Some(*slot.insert(allocate())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::{EditedRow, ExclusionReconciler};
    use crate::model::{TimeRange, TimeWindow};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn facts() -> Vec<Measurement> {
        (0..10)
            .flat_map(|h| [Measurement::new(at(h), "A", 1.0), Measurement::new(at(h), "B", 2.0)])
            .collect()
    }

    fn with_dataset() -> (Repository, TrialId, DatasetId) {
        let repo = Repository::new();
        let trial = repo.create_trial("T", None, facts()).unwrap();
        let window = repo.trial(trial).unwrap().span().covering_window();
        let dataset = repo
            .create_dataset(Dataset::builder("D", trial, window).build())
            .unwrap();
        (repo, trial, dataset)
    }

    #[test]
    fn test_trial_gets_span_and_catalog() {
        let (repo, trial, _) = with_dataset();
        let record = repo.trial(trial).unwrap();
        assert_eq!(record.span().start, at(0));
        assert_eq!(record.span().end, at(9));
        assert_eq!(repo.catalog(trial).unwrap().len(), 2);
        assert!(matches!(
            repo.create_trial("T", None, facts()),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_dataset_window_must_lie_in_span() {
        let (repo, trial, _) = with_dataset();
        let window = TimeWindow::new(at(5), at(30)).unwrap();
        let err = repo
            .create_dataset(Dataset::builder("Late", trial, window).build())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let (repo, trial, dataset) = with_dataset();
        let catalog = repo.catalog(trial).unwrap();
        let reconciler = ExclusionReconciler::new(&catalog);

        let plan = reconciler
            .reconcile(&[], &[EditedRow::new(TimeRange::new(at(3), at(5)), ["A"])])
            .unwrap();
        let committed = repo.commit_reconciliation(dataset, &plan).unwrap();
        assert_eq!(committed.len(), 1);

        // a plan computed against an older state no longer applies
        let stale = ReconcilePlan {
            deletes: vec![ExclusionId(9_999)],
            ..plan.clone()
        };
        let err = repo.commit_reconciliation(dataset, &stale).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert_eq!(repo.exclusions(dataset).unwrap(), committed);
    }

    #[test]
    fn test_clone_dataset_names_and_identities() {
        let (repo, trial, dataset) = with_dataset();
        let catalog = repo.catalog(trial).unwrap();
        let plan = ExclusionReconciler::new(&catalog)
            .reconcile(&[], &[EditedRow::all_sensors(TimeRange::new(at(1), at(2)))])
            .unwrap();
        repo.commit_reconciliation(dataset, &plan).unwrap();

        let first = repo.clone_dataset(dataset).unwrap();
        let second = repo.clone_dataset(dataset).unwrap();
        assert_eq!(repo.dataset(first).unwrap().name(), "D_1");
        assert_eq!(repo.dataset(second).unwrap().name(), "D_2");

        let original = repo.exclusions(dataset).unwrap();
        let copied = repo.exclusions(first).unwrap();
        assert_eq!(copied.len(), 1);
        assert_ne!(copied[0].id(), original[0].id());
        assert_eq!(copied[0].sensors(), original[0].sensors());
    }

    #[test]
    fn test_delete_trial_cascades() {
        let (repo, trial, dataset) = with_dataset();
        let project = repo.create_project("P").unwrap();
        repo.attach_dataset(project, dataset).unwrap();

        repo.delete_trial(trial).unwrap();
        assert!(matches!(repo.dataset(dataset), Err(Error::NotFound(_))));
        assert!(matches!(repo.facts(trial), Err(Error::NotFound(_))));
        assert!(matches!(repo.catalog(trial), Err(Error::NotFound(_))));
        assert!(repo.project(project).unwrap().datasets().is_empty());
    }

    #[test]
    fn test_delete_project_keeps_datasets() {
        let (repo, _, dataset) = with_dataset();
        let project = repo.create_project("P").unwrap();
        repo.attach_dataset(project, dataset).unwrap();
        repo.delete_project(project).unwrap();
        assert!(repo.dataset(dataset).is_ok());
    }

    #[test]
    fn test_concurrent_creates_keep_names_unique() {
        let (repo, trial, _) = with_dataset();
        let window = repo.trial(trial).unwrap().span().covering_window();
        let (projects, datasets) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let project = repo.create_project("Shared").is_ok();
                        let dataset = repo
                            .create_dataset(Dataset::builder("Shared", trial, window).build())
                            .is_ok();
                        (project, dataset)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .fold((0, 0), |(p, d), (ok_p, ok_d)| (p + usize::from(ok_p), d + usize::from(ok_d)))
        });
        assert_eq!(projects, 1);
        assert_eq!(datasets, 1);
        assert_eq!(repo.datasets_of_trial(trial).len(), 2);
    }

    #[test]
    fn test_names_are_released_on_delete_and_failure() {
        let (repo, trial, dataset) = with_dataset();
        assert!(matches!(
            repo.create_trial("Empty", None, Vec::new()),
            Err(Error::InvalidParameter(_))
        ));
        assert!(repo.create_trial("Empty", None, facts()).is_ok());

        let window = repo.trial(trial).unwrap().span().covering_window();
        repo.delete_dataset(dataset).unwrap();
        assert!(repo
            .create_dataset(Dataset::builder("D", trial, window).build())
            .is_ok());

        let project = repo.create_project("P").unwrap();
        repo.delete_project(project).unwrap();
        assert!(repo.create_project("P").is_ok());

        repo.delete_trial(trial).unwrap();
        assert!(repo.create_trial("T", None, facts()).is_ok());
    }
}

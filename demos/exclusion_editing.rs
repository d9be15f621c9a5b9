//! Editing a dataset's exclusion table
//!
//! This example demonstrates:
//! - Diffing an edited exclusion table against the persisted one
//! - Atomic commit of updates, inserts and deletes
//! - Rollback when a plan no longer matches the persisted state
//! - Cloning a dataset together with its exclusions
//!
//! Run with: cargo run --example exclusion_editing

use chrono::{Duration, TimeZone, Utc};
use trialscope::exclusion::EditedRow;
use trialscope::model::{Dataset, TimeRange};
use trialscope::query::QueryRequest;
use trialscope::storage::Measurement;
use trialscope::TrialScope;

fn main() -> anyhow::Result<()> {
    let scope = TrialScope::builder().build()?;
    let _ = TrialScope::init_tracing(scope.config());

    println!("=== trialscope Exclusion Editing Example ===\n");

    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let at = |h: i64| t0 + Duration::hours(h);
    let facts = (0..10)
        .flat_map(|h| {
            [
                Measurement::new(at(h), "A", h as f64),
                Measurement::new(at(h), "B", 10.0 * h as f64),
            ]
        })
        .collect();

    let repo = scope.repository();
    let trial = repo.create_trial("Trial", None, facts)?;
    let window = repo.trial(trial)?.span().covering_window();
    let dataset = repo.create_dataset(Dataset::builder("Ten hours", trial, window).build())?;

    // Exclude hours 3-5 for sensor A
    let edited = [EditedRow::new(TimeRange::new(at(3), at(5)), ["A"])];
    let plan = scope.reconcile_exclusions(dataset, &edited)?;
    println!(
        "First edit: {} inserts, {} updates, {} deletes",
        plan.inserts.len(),
        plan.updates.len(),
        plan.deletes.len()
    );
    scope.commit_reconciliation(dataset, &plan)?;

    let a = scope.query(dataset, &QueryRequest::sensors(["A"]))?.count();
    let b = scope.query(dataset, &QueryRequest::sensors(["B"]))?.count();
    println!("  ✓ A: {a} rows, B: {b} rows\n");

    // Widen the existing row and add an all-sensor row
    let persisted = repo.exclusions(dataset)?;
    let mut edited: Vec<EditedRow> = persisted.iter().map(EditedRow::from_exclusion).collect();
    edited[0].range = TimeRange::new(at(2), at(5));
    edited.push(EditedRow::all_sensors(TimeRange::new(at(9), at(9))));

    let plan = scope.reconcile_exclusions(dataset, &edited)?;
    println!(
        "Second edit: {} inserts, {} updates, {} deletes",
        plan.inserts.len(),
        plan.updates.len(),
        plan.deletes.len()
    );
    let stale = plan.clone();
    scope.commit_reconciliation(dataset, &plan)?;
    println!("  ✓ Rows now: {}\n", scope.row_count(dataset, &["A".to_string(), "B".to_string()])?);

    // Drop everything, then try to replay the old plan
    let clear = scope.reconcile_exclusions(dataset, &[])?;
    scope.commit_reconciliation(dataset, &clear)?;
    match scope.commit_reconciliation(dataset, &stale) {
        Ok(_) => println!("Stale plan unexpectedly applied"),
        Err(e) => println!("Stale plan rejected: {e}"),
    }
    println!("  ✓ Exclusions after rollback: {}\n", repo.exclusions(dataset)?.len());

    // Clone keeps window and exclusions under a fresh name
    commit_again(&scope, dataset, at(0))?;
    let copy = repo.clone_dataset(dataset)?;
    println!(
        "Cloned \"{}\" as \"{}\" with {} exclusions",
        repo.dataset(dataset)?.name(),
        repo.dataset(copy)?.name(),
        repo.exclusions(copy)?.len()
    );

    Ok(())
}

fn commit_again(
    scope: &TrialScope,
    dataset: trialscope::model::DatasetId,
    start: chrono::DateTime<Utc>,
) -> trialscope::Result<()> {
    let row = EditedRow::all_sensors(TimeRange::new(start, start + Duration::hours(1)));
    let plan = scope.reconcile_exclusions(dataset, &[row])?;
    scope.commit_reconciliation(dataset, &plan)?;
    Ok(())
}

//! Basic trialscope usage: trial → dataset → query → transforms → CSV
//!
//! This example demonstrates:
//! - Creating a trial from minute-sampled readings
//! - Carving a dataset out of the trial span
//! - Group-filtered queries
//! - DLI, transmissibility and occurrence-count transforms
//! - Wide CSV export
//!
//! Run with: cargo run --example basic_usage

use chrono::{Duration, TimeZone, Utc};
use trialscope::filter::FilterSpec;
use trialscope::model::{Dataset, TimeWindow};
use trialscope::query::QueryRequest;
use trialscope::storage::Measurement;
use trialscope::transform::{TimeUnit, Transform};
use trialscope::TrialScope;

fn main() -> anyhow::Result<()> {
    let scope = TrialScope::builder().build()?;
    let _ = TrialScope::init_tracing(scope.config());

    println!("=== trialscope Basic Usage Example ===\n");

    // Three days of minute readings: two PAR sensors and an air temperature
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let mut facts = Vec::new();
    for m in 0..3 * 1440 {
        let ts = t0 + Duration::minutes(m);
        let minute_of_day = (m % 1440) as f64;
        let daylight = (std::f64::consts::PI * (minute_of_day - 360.0) / 720.0).sin().max(0.0);
        facts.push(Measurement::new(ts, "PAR_out", 1500.0 * daylight));
        facts.push(Measurement::new(ts, "PAR_in", 1050.0 * daylight));
        facts.push(Measurement::new(ts, "T_air", 18.0 + 8.0 * daylight));
    }
    println!("Creating trial from {} readings...", facts.len());

    let repo = scope.repository();
    let trial = repo.create_trial("Greenhouse 1", Some("spring tomato run"), facts)?;
    let span = repo.trial(trial)?.span();
    println!("  ✓ Span: {} .. {}", span.start, span.end);

    repo.update_catalog(trial, |c| c.rename("PAR_in", Some("PAR inside")))?;
    println!("  ✓ Renamed PAR_in to \"PAR inside\"\n");

    // Dataset over the first two days
    let window = TimeWindow::new(t0, t0 + Duration::days(2))?;
    let dataset = repo.create_dataset(Dataset::builder("First two days", trial, window).build())?;

    let project = repo.create_project("Light study")?;
    repo.attach_dataset(project, dataset)?;
    repo.update_project(project, |p| p.upsert_group("type", "PAR", ["PAR inside", "PAR_out"]))?;

    let request = QueryRequest::all()
        .in_project(project)
        .filter(FilterSpec::group("type", "PAR"))
        .filter(FilterSpec::exclude_sensor("PAR_out"));
    let rows = scope.query(dataset, &request)?.count();
    println!("Group-filtered query (type=PAR, without PAR_out): {rows} rows\n");

    // Transforms
    let inside = vec!["PAR inside".to_string()];
    let dli = scope.transform(dataset, &Transform::Dli, &inside)?;
    println!("{}:", dli.description);
    for row in &dli.rows {
        println!("  {} {:<12} {:.2}", row.key, row.variable, row.value);
    }

    let tx = scope.transform(dataset, &Transform::transmissibility("PAR_out")?, &inside)?;
    println!("\n{}: {} rows (night rows dropped)", tx.description, tx.rows.len());

    let warm = Transform::occurrence_count(24.0, 30.0)?;
    let counts = scope.transform(dataset, &warm, &["T_air".to_string()])?;
    println!("\n{}:", counts.description);
    for row in &counts.rows {
        println!("  {} {:<12} {}", row.key, row.variable, row.value);
    }

    let mean = Transform::running_mean(1, TimeUnit::Hours)?;
    let hourly = scope.transform(dataset, &mean, &["T_air".to_string()])?;
    println!("\n{}: {} rows", hourly.description, hourly.rows.len());

    // CSV export
    println!("\nDLI as CSV:");
    let mut out = std::io::stdout().lock();
    scope.export_csv(dataset, &Transform::Dli, &inside, &mut out)?;

    Ok(())
}

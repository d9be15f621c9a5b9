//! Plot rendering and CSV export through the engine facade

use chrono::{DateTime, Duration, TimeZone, Utc};
use trialscope::config::EngineConfig;
use trialscope::export::CsvExporter;
use trialscope::model::{Dataset, DatasetId, ProjectId, TrialId};
use trialscope::shape::{PlotFormat, PlotSpec, ShapedPlot};
use trialscope::storage::Measurement;
use trialscope::transform::Transform;
use trialscope::TrialScope;

fn at(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Trial with an axis sensor `Out` and two inside sensors over three hours.
fn setup(scope: &TrialScope, trial_name: &str, dataset_name: &str) -> (TrialId, DatasetId) {
    let facts = (0..3)
        .flat_map(|h| {
            [
                Measurement::new(at(h), "Out", 10.0 * (h + 1) as f64),
                Measurement::new(at(h), "In1", 1.0 + h as f64),
                Measurement::new(at(h), "In2", 5.0),
            ]
        })
        .collect();
    let repo = scope.repository();
    let trial = repo.create_trial(trial_name, None, facts).unwrap();
    let window = repo.trial(trial).unwrap().span().covering_window();
    let dataset = repo
        .create_dataset(Dataset::builder(dataset_name, trial, window).build())
        .unwrap();
    (trial, dataset)
}

fn project_with_zones(scope: &TrialScope, dataset: DatasetId) -> ProjectId {
    let repo = scope.repository();
    let project = repo.create_project("Zones").unwrap();
    repo.attach_dataset(project, dataset).unwrap();
    repo.update_project(project, |p| p.upsert_group("zone", "north", ["In1"]))
        .unwrap();
    repo.update_project(project, |p| p.upsert_group("type", "air", ["In1", "In2"]))
        .unwrap();
    project
}

#[test]
fn test_render_group_joined_plot() {
    let scope = TrialScope::builder().build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let project = project_with_zones(&scope, dataset);

    let plot = PlotSpec::new(dataset, names(&["In1", "In2"]), Transform::Raw).with_format(
        PlotFormat::GroupJoined {
            axis_sensor: "Out".to_string(),
            group_key: "zone".to_string(),
        },
    );
    let ShapedPlot::GroupJoined(rows) = scope.render_plot(&plot, Some(project)).unwrap() else {
        panic!("expected group-joined rows");
    };
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.variable != "Out"));
    for row in &rows {
        let expected = if row.variable == "In1" { Some("north") } else { None };
        assert_eq!(row.group_value.as_deref(), expected);
    }
    let first = rows.iter().find(|r| r.variable == "In1").unwrap();
    assert!((first.axis_value - 10.0).abs() < f64::EPSILON);
}

#[test]
fn test_render_paired_axis_plot() {
    let scope = TrialScope::builder().build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let plot = PlotSpec::new(dataset, names(&["Out", "In1"]), Transform::Raw).with_format(
        PlotFormat::PairedAxis {
            x: "Out".to_string(),
            y: "Missing".to_string(),
        },
    );
    let ShapedPlot::PairedAxis(table) = scope.render_plot(&plot, None).unwrap() else {
        panic!("expected paired-axis table");
    };
    let points = table.points();
    assert_eq!(points.len(), 3);
    assert_eq!(points[2].1, Some(30.0));
    assert!(points.iter().all(|p| p.2.is_none()));
}

#[test]
fn test_render_rejects_invalid_plot() {
    let scope = TrialScope::builder().build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let plot = PlotSpec::new(dataset, Vec::new(), Transform::Raw);
    assert!(scope.render_plot(&plot, None).is_err());
}

#[test]
fn test_export_wide_csv() {
    let scope = TrialScope::builder().build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let mut buf = Vec::new();
    scope
        .export_csv(dataset, &Transform::Raw, &names(&["In1", "In2"]), &mut buf)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "timestamp,In1,In2",
            "2024-05-01 00:00:00,1,5",
            "2024-05-01 01:00:00,2,5",
            "2024-05-01 02:00:00,3,5",
        ]
    );
}

#[test]
fn test_export_transmissibility_csv_to_file() {
    let config = EngineConfig {
        csv_delimiter: ';',
        ..EngineConfig::default()
    };
    let scope = TrialScope::builder().config(config).build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tx.csv");

    let tx = Transform::transmissibility("Out").unwrap();
    scope
        .export_csv_file(dataset, &tx, &names(&["In2"]), &path)
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "timestamp;In2");
    assert_eq!(lines[1], "2024-05-01 00:00:00;0.5");
    assert_eq!(lines.len(), 4);
}

#[test]
fn test_export_project_csv() {
    let scope = TrialScope::builder().build().unwrap();
    let (_, first) = setup(&scope, "T1", "D1");
    let (_, second) = setup(&scope, "T2", "D2");
    let project = project_with_zones(&scope, first);
    scope.repository().attach_dataset(project, second).unwrap();

    let mut buf = Vec::new();
    scope
        .export_project_csv(project, &Transform::Dli, Some(&names(&["In2"])), &mut buf)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "day,trial,dataset,In2");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2024-05-01,T1,D1,"));
    assert!(lines[2].starts_with("2024-05-01,T2,D2,"));
}

#[test]
fn test_export_with_custom_delimiter_and_timestamp_format() {
    let config = EngineConfig {
        csv_delimiter: '\t',
        timestamp_format: "%d/%m/%Y %Hh".to_string(),
        ..EngineConfig::default()
    };
    let scope = TrialScope::builder().config(config).build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");

    let mut buf = Vec::new();
    scope
        .export_csv(dataset, &Transform::Raw, &names(&["In1"]), &mut buf)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["timestamp\tIn1", "01/05/2024 00h\t1", "01/05/2024 01h\t2", "01/05/2024 02h\t3"]);
}

#[test]
fn test_builder_rejects_unknown_timestamp_specifier() {
    let config = EngineConfig {
        timestamp_format: "%Y-%Q".to_string(),
        ..EngineConfig::default()
    };
    let err = TrialScope::builder().config(config).build().unwrap_err();
    assert!(matches!(err, trialscope::Error::InvalidParameter(_)));
}

#[test]
fn test_exporter_reports_unrenderable_timestamp_format() {
    let config = EngineConfig {
        timestamp_format: "%Y-%Q".to_string(),
        ..EngineConfig::default()
    };
    let scope = TrialScope::builder().build().unwrap();
    let (_, dataset) = setup(&scope, "T", "D");
    let output = scope
        .transform(dataset, &Transform::Raw, &names(&["In1"]))
        .unwrap();

    let exporter = CsvExporter::new(&config);
    let err = exporter.render(&output).unwrap_err();
    assert!(matches!(err, trialscope::Error::InvalidParameter(_)));
}

#[test]
fn test_group_joined_plot_rejects_group_citing_renamed_sensor() {
    let scope = TrialScope::builder().build().unwrap();
    let (trial, dataset) = setup(&scope, "T", "D");
    let project = project_with_zones(&scope, dataset);
    scope
        .repository()
        .update_catalog(trial, |c| c.rename("In1", Some("Inside 1")))
        .unwrap();

    let plot = PlotSpec::new(dataset, names(&["Inside 1", "In2"]), Transform::Raw).with_format(
        PlotFormat::GroupJoined {
            axis_sensor: "Out".to_string(),
            group_key: "zone".to_string(),
        },
    );
    let err = scope.render_plot(&plot, Some(project)).unwrap_err();
    assert!(matches!(err, trialscope::Error::InvalidSensorReference(_)));

    scope
        .repository()
        .update_project(project, |p| Ok(p.resync_sensor_name("In1", "Inside 1")))
        .unwrap();
    let ShapedPlot::GroupJoined(rows) = scope.render_plot(&plot, Some(project)).unwrap() else {
        panic!("expected group-joined rows");
    };
    let tagged: Vec<_> = rows.iter().filter(|r| r.group_value.is_some()).collect();
    assert_eq!(tagged.len(), 3);
    assert!(tagged.iter().all(|r| r.variable == "Inside 1"));
}

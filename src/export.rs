//! CSV export of transform outputs
//!
//! Long series are pivoted to one row per time key and one column per
//! variable. The header row holds the time-key column name followed by the
//! variable names; empty cells mean "no reading".

use crate::config::EngineConfig;
use crate::transform::{TimeKey, TransformOutput};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tracing::debug;

/// One dataset's contribution to a project-wide export.
#[derive(Debug, Clone, Copy)]
pub struct ProjectPart<'a> {
    /// Trial name
    pub trial: &'a str,
    /// Dataset name
    pub dataset: &'a str,
    /// Transformed series of the dataset
    pub output: &'a TransformOutput,
}

/// Writes wide CSV tables with the configured delimiter and time format.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    delimiter: u8,
    timestamp_format: String,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl CsvExporter {
    /// Exporter using the configuration's delimiter and timestamp format.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            delimiter: config.delimiter_byte(),
            timestamp_format: config.timestamp_format.clone(),
        }
    }

    /// Write one dataset's output as a wide table.
    ///
    /// # Errors
    /// - `Csv` or `Io` if writing fails
    /// - `InvalidParameter` if the timestamp format cannot render a key
    pub fn write<W: Write>(&self, output: &TransformOutput, writer: W) -> Result<()> {
        let frame = output.to_frame();
        let variables: Vec<&str> = frame.variables().collect();
        let mut csv = self.writer(writer);

        let mut header = vec![output.x.to_string()];
        header.extend(variables.iter().map(|v| (*v).to_string()));
        csv.write_record(&header)?;

        for (i, key) in frame.keys().iter().enumerate() {
            let mut record = vec![key.format(&self.timestamp_format)?];
            for variable in &variables {
                let cell = frame
                    .column(variable)
                    .and_then(|col| col[i])
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                record.push(cell);
            }
            csv.write_record(&record)?;
        }
        csv.flush()?;
        debug!(rows = frame.len(), columns = variables.len(), "exported csv");
        Ok(())
    }

    /// Write one dataset's output to a string.
    ///
    /// # Errors
    /// Returns error if writing fails.
    pub fn render(&self, output: &TransformOutput) -> Result<String> {
        let mut buf = Vec::new();
        self.write(output, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write several datasets as one table keyed by `(time key, trial, dataset)`.
    ///
    /// Columns are the union of all variables; the time-key column is named
    /// after the first part's x role.
    ///
    /// # Errors
    /// - `Csv` or `Io` if writing fails
    /// - `InvalidParameter` if the timestamp format cannot render a key
    pub fn write_project<W: Write>(&self, parts: &[ProjectPart<'_>], writer: W) -> Result<()> {
        let mut variables = BTreeSet::new();
        let mut table: BTreeMap<(TimeKey, &str, &str), BTreeMap<String, f64>> = BTreeMap::new();
        for part in parts {
            for row in &part.output.rows {
                variables.insert(row.variable.as_str());
                table
                    .entry((row.key, part.trial, part.dataset))
                    .or_default()
                    .insert(row.variable.clone(), row.value);
            }
        }

        let key_column = parts
            .first()
            .map_or_else(|| "timestamp".to_string(), |p| p.output.x.to_string());
        let mut csv = self.writer(writer);
        let mut header = vec![key_column, "trial".to_string(), "dataset".to_string()];
        header.extend(variables.iter().map(|v| (*v).to_string()));
        csv.write_record(&header)?;

        for ((key, trial, dataset), values) in &table {
            let mut record = vec![
                key.format(&self.timestamp_format)?,
                (*trial).to_string(),
                (*dataset).to_string(),
            ];
            record.extend(
                variables
                    .iter()
                    .map(|v| values.get(*v).map(f64::to_string).unwrap_or_default()),
            );
            csv.write_record(&record)?;
        }
        csv.flush()?;
        debug!(parts = parts.len(), rows = table.len(), "exported project csv");
        Ok(())
    }

    fn writer<W: Write>(&self, writer: W) -> csv::Writer<W> {
        csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AxisRole, SeriesRow};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn daily(rows: &[(u32, &str, f64)]) -> TransformOutput {
        TransformOutput {
            description: "DLI (mol/m2/day)".to_string(),
            x: AxisRole::Day,
            y: AxisRole::Value,
            rows: rows
                .iter()
                .map(|(d, v, x)| SeriesRow {
                    key: TimeKey::Day(NaiveDate::from_ymd_opt(2024, 5, *d).unwrap()),
                    variable: (*v).to_string(),
                    value: *x,
                })
                .collect(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_wide_table_layout() {
        let out = daily(&[(1, "A", 1.5), (1, "B", 2.0), (2, "A", 3.0)]);
        let text = CsvExporter::default().render(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["day,A,B", "2024-05-01,1.5,2", "2024-05-02,3,"]);
    }

    #[test]
    fn test_delimiter_and_timestamp_format_from_config() {
        let config = EngineConfig {
            csv_delimiter: ';',
            timestamp_format: "%H:%M".to_string(),
            ..EngineConfig::default()
        };
        let out = TransformOutput {
            description: "Raw Data".to_string(),
            x: AxisRole::Timestamp,
            y: AxisRole::Value,
            rows: vec![SeriesRow {
                key: TimeKey::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap()),
                variable: "A".to_string(),
                value: 4.0,
            }],
            warnings: Vec::new(),
        };
        let text = CsvExporter::new(&config).render(&out).unwrap();
        assert_eq!(text, "timestamp;A\n06:30;4\n");
    }

    #[test]
    fn test_project_table_keys_by_trial_and_dataset() {
        let first = daily(&[(1, "A", 1.0)]);
        let second = daily(&[(1, "B", 2.0)]);
        let parts = [
            ProjectPart {
                trial: "T2",
                dataset: "D",
                output: &second,
            },
            ProjectPart {
                trial: "T1",
                dataset: "D",
                output: &first,
            },
        ];
        let mut buf = Vec::new();
        CsvExporter::default().write_project(&parts, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "day,trial,dataset,A,B",
                "2024-05-01,T1,D,1,",
                "2024-05-01,T2,D,,2"
            ]
        );
    }
}

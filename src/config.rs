//! Engine configuration

use crate::transform::DEFAULT_DLI_SCALE;
use crate::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by transforms, export and logging.
///
/// Missing fields in a JSON file fall back to [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Field delimiter of CSV exports (ASCII)
    pub csv_delimiter: char,
    /// `strftime` pattern of timestamp keys in CSV exports
    pub timestamp_format: String,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Factor applied to per-day PAR sums by the DLI transform
    pub dli_scale: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: ',',
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            log_filter: "info".to_string(),
            dli_scale: DEFAULT_DLI_SCALE,
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `InvalidParameter` if the JSON is malformed or a value is out of range
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::param(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is usable.
    ///
    /// # Errors
    /// Returns `InvalidParameter` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if !self.csv_delimiter.is_ascii() {
            return Err(Error::param(format!(
                "csv_delimiter must be ASCII, got {:?}",
                self.csv_delimiter
            )));
        }
        if self.timestamp_format.is_empty() {
            return Err(Error::param("timestamp_format cannot be empty"));
        }
        if StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::param(format!(
                "timestamp_format {:?} is not a valid strftime pattern",
                self.timestamp_format
            )));
        }
        if !self.dli_scale.is_finite() || self.dli_scale <= 0.0 {
            return Err(Error::param(format!(
                "dli_scale must be finite and positive, got {}",
                self.dli_scale
            )));
        }
        Ok(())
    }

    /// Delimiter as the byte the CSV writer expects.
    #[must_use]
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.csv_delimiter).unwrap_or(b',')
    }
}

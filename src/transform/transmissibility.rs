//! Ratio of target sensors to a reference sensor

use super::frame::WideFrame;
use super::{AxisRole, Preprocessor};
use crate::Result;

/// `target / reference` at every timestamp both have a reading.
///
/// The reference column is dropped from the output. Non-finite ratios (a
/// zero reference) leave the cell empty, so the row disappears on melt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmissibility {
    reference: String,
}

impl Transmissibility {
    /// Ratio against the sensor with effective name `reference`.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }

    /// Effective name of the reference sensor.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Preprocessor for Transmissibility {
    fn describe(&self) -> String {
        format!("Transmissibility (ratio) against {}", self.reference)
    }

    fn axes(&self) -> (AxisRole, AxisRole) {
        (AxisRole::Timestamp, AxisRole::Value)
    }

    fn process(&self, mut frame: WideFrame) -> Result<WideFrame> {
        let reference = frame
            .remove_column(&self.reference)
            .unwrap_or_else(|| vec![None; frame.len()]);
        Ok(frame.map_columns(|_, _, col| {
            col.into_iter()
                .zip(&reference)
                .map(|(target, reference)| match (target, reference) {
                    (Some(t), Some(r)) => Some(t / r).filter(|ratio| ratio.is_finite()),
                    _ => None,
                })
                .collect()
        }))
    }
}

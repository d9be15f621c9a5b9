//! Trial - a bounded data-collection campaign

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TimeWindow, TrialId};

/// Observed time span of a trial: first and last fact timestamp, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Earliest observed timestamp
    pub start: DateTime<Utc>,
    /// Latest observed timestamp
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    /// Half-open window `[start, end + 1ms)` covering every fact of the span.
    #[must_use]
    pub fn covering_window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.end + chrono::Duration::milliseconds(1),
        }
    }
}

/// Trial Record.
///
/// The span is derived from the fact log and set together with it when the
/// trial is created; it never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trial {
    id: TrialId,
    name: String,
    notes: Option<String>,
    span: TimeSpan,
}

impl Trial {
    /// Create a trial record for an already-derived span.
    #[must_use]
    pub fn new(id: TrialId, name: impl Into<String>, span: TimeSpan) -> Self {
        Self {
            id,
            name: name.into(),
            notes: None,
            span,
        }
    }

    /// Attach free-text notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn id(&self) -> TrialId {
        self.id
    }

    /// Get the trial name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the notes, if any.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Get the observed time span.
    #[must_use]
    pub const fn span(&self) -> TimeSpan {
        self.span
    }
}

//! Record types for trials, sensors, datasets, exclusions and groups
//!
//! ## Ownership
//!
//! ```text
//! Trial (1) ──< Sensor (N)            [owned, by raw name]
//!    │  └────< Measurement (N)        [owned, append-only, see storage]
//!    │
//!    └──< Dataset (N) ──< Exclusion (N)   [owned]
//!
//! Project >──< Dataset                [association by id]
//! Project (1) ──< Group (N) ··> Sensor   [reference by effective name]
//! ```
//!
//! Records refer to each other by id newtypes only; no record holds a pointer
//! to another. Name references (groups, exclusions) are resolved at use.

mod dataset;
mod exclusion;
mod group;
mod project;
mod sensor;
mod trial;

pub use dataset::{Dataset, DatasetBuilder, TimeWindow};
pub use exclusion::{Exclusion, TimeRange};
pub use group::Group;
pub use project::{GroupRow, Project};
pub use sensor::Sensor;
pub use trial::{TimeSpan, Trial};

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value of the identity.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

record_id!(
    /// Identity of a [`Trial`].
    TrialId,
    "trial"
);
record_id!(
    /// Identity of a [`Dataset`].
    DatasetId,
    "dataset"
);
record_id!(
    /// Identity of a persisted [`Exclusion`].
    ExclusionId,
    "exclusion"
);
record_id!(
    /// Identity of a [`Project`].
    ProjectId,
    "project"
);
record_id!(
    /// Identity of a [`Group`].
    GroupId,
    "group"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(TrialId(3).to_string(), "trial-3");
        assert_eq!(ExclusionId(12).to_string(), "exclusion-12");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&DatasetId(7)).unwrap();
        assert_eq!(json, "7");
        let back: DatasetId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DatasetId(7));
    }
}

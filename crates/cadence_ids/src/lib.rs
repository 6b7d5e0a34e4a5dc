//! Shared identifier wrappers for Cadence.
//!
//! Identifiers are store-assigned and monotonically increasing, so a larger
//! id always belongs to a later record of the same kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when parsing a numeric identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_numeric_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                value
                    .trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_numeric_id!(PipelineId, "pipeline ID");
define_numeric_id!(JobId, "job ID");
define_numeric_id!(EventId, "event ID");
define_numeric_id!(BuildId, "build ID");
define_numeric_id!(StageId, "stage ID");
define_numeric_id!(StageBuildId, "stage build ID");
define_numeric_id!(StepId, "step ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let id: BuildId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_non_numeric() {
        let err = JobId::parse("abc").unwrap_err();
        assert!(err.to_string().starts_with("Invalid job ID"));
    }

    #[test]
    fn later_ids_order_after_earlier_ones() {
        assert!(BuildId::new(7) > BuildId::new(3));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&EventId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}

//! Run identifiers.
//!
//! A run is identified by the local wall-clock time it started at, formatted
//! as `YYYYMMDD-HHMMSS-mmm`. The id doubles as the log file stem, so parsing
//! is strict: anything that is not exactly that shape is rejected before it
//! can be joined onto a filesystem path.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const RUN_ID_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Unique identifier for one conversation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Creates a run ID from the current local time.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_timestamp(Local::now())
    }

    /// Creates a run ID from a specific timestamp.
    #[must_use]
    pub fn from_timestamp(timestamp: DateTime<Local>) -> Self {
        Self(timestamp.format(RUN_ID_FORMAT).to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // digit groups of 8, 6 and 3 separated by '-'
        let groups: Vec<&str> = s.split('-').collect();
        let well_formed = groups.len() == 3
            && groups
                .iter()
                .zip([8usize, 6, 3])
                .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_digit()));

        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseIdError {
                id_type: "RunId",
                reason: format!("expected YYYYMMDD-HHMMSS-mmm, got '{s}'"),
            })
        }
    }
}

impl TryFrom<String> for RunId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_format() {
        let ts = Local
            .with_ymd_and_hms(2025, 3, 9, 14, 5, 7)
            .single()
            .expect("valid timestamp");
        let id = RunId::from_timestamp(ts);
        assert_eq!(id.as_str(), "20250309-140507-000");
    }

    #[test]
    fn generated_id_parses() {
        let id = RunId::generate();
        let parsed: RunId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_path_like_input() {
        for bad in ["../etc/passwd", "20250309-140507", "20250309-14050x-000", ""] {
            let result: Result<RunId, _> = bad.parse();
            assert!(result.is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = RunId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: RunId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);

        let invalid: Result<RunId, _> = serde_json::from_str("\"nope\"");
        assert!(invalid.is_err());
    }
}

//! Strongly-typed ID types for persisted entities.
//!
//! Storage-assigned identifiers use ULIDs so records sort by creation time.
//! Author-assigned graph identifiers are plain strings and live in
//! `opsflow-workflow`, since the editing surface mints them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

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

/// Generates a ULID-backed ID newtype with a display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a freshly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid_str = s
                    .strip_prefix(concat!($prefix, "_"))
                    .unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a workflow (one automation).
    WorkflowId,
    "wf"
);

define_id!(
    /// Storage-assigned identifier of a persisted workflow node record.
    NodeStorageId,
    "nrec"
);

define_id!(
    /// Storage-assigned identifier of a persisted connection record.
    ConnectionStorageId,
    "crec"
);

define_id!(
    /// Unique identifier for a schedule binding a workflow to a cron expression.
    ScheduleId,
    "sched"
);

define_id!(
    /// Unique identifier for one dispatch of a due schedule.
    ExecutionId,
    "exec"
);

define_id!(
    /// Unique identifier for a queued workflow run.
    WorkflowRunId,
    "run"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(NodeStorageId::new().to_string().starts_with("nrec_"));
        assert!(ScheduleId::new().to_string().starts_with("sched_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = ScheduleId::new();
        let parsed: ScheduleId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: ScheduleId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "wf_not-a-ulid".parse::<WorkflowId>().unwrap_err();
        assert_eq!(err.id_type, "WorkflowId");
    }

    #[test]
    fn serializes_as_prefixed_string() {
        let id = NodeStorageId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));

        let parsed: NodeStorageId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashSet;

        let a = ConnectionStorageId::new();
        let b = ConnectionStorageId::new();
        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}

//! Strongly-typed ID types for domain entities.
//!
//! All IDs use ULID (Universally Unique Lexicographically Sortable Identifier) format,
//! providing both uniqueness and temporal ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};
use ulid::{Generator, Ulid};

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

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
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
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = s.strip_prefix(prefix_with_underscore).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl From<$name> for Ulid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Unique identifier for a single execution (run) of a workflow.
    ///
    /// Prefer [`ExecutionId::next`], which guarantees strictly increasing
    /// ids within this process.
    ExecutionId,
    "exec"
);

define_id!(
    /// Unique identifier for a trigger.
    TriggerId,
    "trg"
);

static EXECUTION_IDS: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

impl ExecutionId {
    /// Allocates the next execution id.
    ///
    /// Ids from the same process sort in allocation order, even when several
    /// are created within the same millisecond. Falls back to a random ULID
    /// if the generator overflows its random component.
    #[must_use]
    pub fn next() -> Self {
        let generated = match EXECUTION_IDS.lock() {
            Ok(mut generator) => generator.generate().ok(),
            Err(poisoned) => poisoned.into_inner().generate().ok(),
        };
        Self(generated.unwrap_or_else(Ulid::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_display_format() {
        let id = WorkflowId::new();
        assert!(id.to_string().starts_with("wf_"));
    }

    #[test]
    fn execution_id_display_format() {
        let id = ExecutionId::next();
        assert!(id.to_string().starts_with("exec_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = TriggerId::new();
        let parsed: TriggerId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: WorkflowId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "not_a_ulid".parse::<ExecutionId>().unwrap_err();
        assert_eq!(err.id_type, "ExecutionId");
    }

    #[test]
    fn execution_ids_are_strictly_increasing() {
        let ids: Vec<ExecutionId> = (0..1000).map(|_| ExecutionId::next()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = ExecutionId::next();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let parsed: ExecutionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }
}

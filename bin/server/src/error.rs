//! Error types for the blockflow daemon.

use std::fmt;
use std::path::PathBuf;

/// Errors surfaced at the application boundary.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// A definition file could not be read or parsed.
    Definition { path: PathBuf, details: String },
    /// Storage rejected a definition.
    Storage { details: String },
    /// Trigger loading failed.
    Triggers { details: String },
    /// `--input` is not valid JSON.
    InvalidInput { details: String },
    /// A workflow could not be run, or did not complete.
    Run { details: String },
    /// Waiting for the shutdown signal failed.
    Signal { details: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Definition { path, details } => {
                write!(f, "invalid definition '{}': {details}", path.display())
            }
            Self::Storage { details } => write!(f, "storage error: {details}"),
            Self::Triggers { details } => write!(f, "failed to load triggers: {details}"),
            Self::InvalidInput { details } => write!(f, "invalid input: {details}"),
            Self::Run { details } => write!(f, "run failed: {details}"),
            Self::Signal { details } => write!(f, "signal handling failed: {details}"),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_names_file() {
        let err = ServerError::Definition {
            path: PathBuf::from("workflows/a.json"),
            details: "missing field `name`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid definition 'workflows/a.json': missing field `name`"
        );
    }
}

//! Errors raised while locating, reading and checking `payflow-config.yaml`.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// None of the accepted file names exist in the config directory
    #[error("no payflow config found, tried {}", join_paths(.candidates))]
    NotFound { candidates: Vec<PathBuf> },

    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is {size} bytes, limit is {limit}", .path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// YAML syntax error, or a document that does not fit the config structs
    #[error("{} is not a usable payflow config: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("{key} must be set")]
    Missing { key: &'static str },

    /// A setting that parsed but cannot drive the scheduler
    #[error("{key} = {value} rejected: {reason}")]
    Rejected {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigurationError {
    pub fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn rejected(key: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::Rejected {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Dotted key of the offending setting, when there is one
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Missing { key } | Self::Rejected { key, .. } => Some(*key),
            _ => None,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

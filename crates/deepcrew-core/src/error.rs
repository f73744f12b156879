use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::phase::Phase;

/// Core error type for DeepCrew.
#[derive(Debug, Error)]
pub enum DeepCrewError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("invalid research request: {0}")]
    Validation(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepCrewError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// Error raised by an executor while running a single phase. Always terminal.
#[derive(Debug, Clone)]
pub struct PhaseError {
    pub phase: Phase,
    pub reason: String,
}

impl PhaseError {
    pub fn new(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed: {}", self.phase.as_str(), self.reason)
    }
}

impl std::error::Error for PhaseError {}

//! Per-pid verdicts.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Descriptor, RPC or memory consistency violations.
    LogError,
    /// Allocations never freed.
    NotAllFreed,
    /// Descriptors still registered at end of log.
    ActiveDescriptors,
    /// A known-bug function logged a warning or error.
    WarningStrict,
    /// A warning was logged while checking in strict mode.
    WarningMode,
}

impl FailureKind {
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::LogError => "Errors detected in log file",
            Self::NotAllFreed => "Not all memory allocations freed",
            Self::ActiveDescriptors => "Active descriptors at end of log file",
            Self::WarningStrict => "Error for warnings from strict files",
            Self::WarningMode => "Error for warnings in strict mode",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub details: String,
}

/// Result of checking one pid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail(Failure),
}

impl Outcome {
    #[must_use]
    pub fn fail(kind: FailureKind, details: impl Into<String>) -> Self {
        Self::Fail(Failure {
            kind,
            details: details.into(),
        })
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Pass => None,
            Self::Fail(failure) => Some(failure.kind),
        }
    }

    pub fn into_result(self) -> Result<(), LogCheckError> {
        match self {
            Self::Pass => Ok(()),
            Self::Fail(failure) => Err(failure.into()),
        }
    }
}

/// Error form of a failed [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogCheckError {
    #[error("Errors detected in log file: {0}")]
    LogError(String),
    #[error("Not all memory allocations freed: {0}")]
    NotAllFreed(String),
    #[error("Active descriptors at end of log file: {0}")]
    ActiveDescriptors(String),
    #[error("Error for warnings from strict files: {0}")]
    WarningStrict(String),
    #[error("Error for warnings in strict mode: {0}")]
    WarningMode(String),
}

impl LogCheckError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::LogError(_) => FailureKind::LogError,
            Self::NotAllFreed(_) => FailureKind::NotAllFreed,
            Self::ActiveDescriptors(_) => FailureKind::ActiveDescriptors,
            Self::WarningStrict(_) => FailureKind::WarningStrict,
            Self::WarningMode(_) => FailureKind::WarningMode,
        }
    }
}

impl From<Failure> for LogCheckError {
    fn from(failure: Failure) -> Self {
        let Failure { kind, details } = failure;
        match kind {
            FailureKind::LogError => Self::LogError(details),
            FailureKind::NotAllFreed => Self::NotAllFreed(details),
            FailureKind::ActiveDescriptors => Self::ActiveDescriptors(details),
            FailureKind::WarningStrict => Self::WarningStrict(details),
            FailureKind::WarningMode => Self::WarningMode(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_sort_by_priority() {
        let mut kinds = vec![
            FailureKind::WarningMode,
            FailureKind::ActiveDescriptors,
            FailureKind::LogError,
            FailureKind::WarningStrict,
            FailureKind::NotAllFreed,
        ];
        kinds.sort();
        assert_eq!(kinds[0], FailureKind::LogError);
        assert_eq!(kinds[4], FailureKind::WarningMode);
    }

    #[test]
    fn failure_converts_to_matching_error() {
        let err = Outcome::fail(FailureKind::NotAllFreed, "2 regions")
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotAllFreed);
        assert_eq!(err.to_string(), "Not all memory allocations freed: 2 regions");
        assert!(Outcome::Pass.into_result().is_ok());
    }
}

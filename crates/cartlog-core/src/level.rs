//! CaRT log severity table.
//!
//! Levels are declared most severe first, so the derived ordering matches the
//! logger's priority table: `Emit < Emerg < ... < Info < Debug`. Callers compare
//! levels, they never look at numeric ranks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of a single log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "EMIT")]
    Emit,
    #[serde(rename = "EMRG")]
    Emerg,
    #[serde(rename = "ALRT")]
    Alert,
    #[serde(rename = "CRIT")]
    Crit,
    #[serde(rename = "ERR")]
    Err,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "NOTE")]
    Note,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "DBUG")]
    Debug,
}

/// Every level, most severe first.
pub const ALL_LEVELS: [LogLevel; 9] = [
    LogLevel::Emit,
    LogLevel::Emerg,
    LogLevel::Alert,
    LogLevel::Crit,
    LogLevel::Err,
    LogLevel::Warn,
    LogLevel::Note,
    LogLevel::Info,
    LogLevel::Debug,
];

impl LogLevel {
    /// Four-letter name as written by the CaRT logger.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Emit => "EMIT",
            Self::Emerg => "EMRG",
            Self::Alert => "ALRT",
            Self::Crit => "CRIT",
            Self::Err => "ERR",
            Self::Warn => "WARN",
            Self::Note => "NOTE",
            Self::Info => "INFO",
            Self::Debug => "DBUG",
        }
    }

    /// WARN or anything more severe.
    #[must_use]
    pub fn is_warning_or_worse(self) -> bool {
        self <= Self::Warn
    }

    /// Strictly more severe than ERR (CRIT, ALRT, EMRG, EMIT).
    #[must_use]
    pub fn is_worse_than_error(self) -> bool {
        self < Self::Err
    }

    /// More verbose than INFO.
    #[must_use]
    pub fn is_debug(self) -> bool {
        self > Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level '{0}'")]
pub struct UnknownLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, UnknownLevel> {
        // The logger pads "ERR" to four columns.
        let trimmed = s.trim();
        ALL_LEVELS
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(trimmed))
            .or_else(|| match trimmed.to_ascii_uppercase().as_str() {
                "DEBUG" => Some(LogLevel::Debug),
                "ERROR" => Some(LogLevel::Err),
                "WARNING" => Some(LogLevel::Warn),
                _ => None,
            })
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_runs_most_severe_first() {
        assert!(LogLevel::Err < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        for pair in ALL_LEVELS.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn warning_threshold_includes_errors() {
        assert!(LogLevel::Err.is_warning_or_worse());
        assert!(LogLevel::Warn.is_warning_or_worse());
        assert!(!LogLevel::Note.is_warning_or_worse());
        assert!(LogLevel::Crit.is_worse_than_error());
        assert!(!LogLevel::Err.is_worse_than_error());
    }

    #[test]
    fn only_dbug_is_debug() {
        let debug: Vec<_> = ALL_LEVELS.iter().filter(|l| l.is_debug()).collect();
        assert_eq!(debug, vec![&LogLevel::Debug]);
    }

    #[test]
    fn parses_logger_names() {
        assert_eq!("DBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("ERR ".parse::<LogLevel>().unwrap(), LogLevel::Err);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("ALRT".parse::<LogLevel>().unwrap(), LogLevel::Alert);
        assert!("LOUD".parse::<LogLevel>().is_err());
    }

    #[test]
    fn serde_uses_logger_names() {
        let json = serde_json::to_string(&LogLevel::Debug).unwrap();
        assert_eq!(json, "\"DBUG\"");
        let level: LogLevel = serde_json::from_str("\"NOTE\"").unwrap();
        assert_eq!(level, LogLevel::Note);
    }
}

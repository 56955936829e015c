//! Checker configuration.
//!
//! Defaults match the behaviour of the CI log checks. Each switch can be
//! overridden from the environment:
//! - `CARTLOG_QUIET`: skip per-pid summaries, RPC tallies and logging stats.
//! - `CARTLOG_SHOW_MEMLEAKS`: report unfreed allocations at end of run.
//! - `CARTLOG_COUNT_MEMORY_ERRORS`: count unknown/double frees and bad
//!   reallocs as log errors rather than only printing them.
//! - `CARTLOG_LINT_FUNCTION_NAMES`: warn on messages that repeat their own
//!   function name.
//! - `CARTLOG_HIDE_FI_CALLS`: fault injection mode; in strict mode, skip the
//!   noise injected faults produce and check how allocation failures are
//!   logged instead.

use serde::{Deserialize, Serialize};

pub const ENV_QUIET: &str = "CARTLOG_QUIET";
pub const ENV_SHOW_MEMLEAKS: &str = "CARTLOG_SHOW_MEMLEAKS";
pub const ENV_COUNT_MEMORY_ERRORS: &str = "CARTLOG_COUNT_MEMORY_ERRORS";
pub const ENV_LINT_FUNCTION_NAMES: &str = "CARTLOG_LINT_FUNCTION_NAMES";
pub const ENV_HIDE_FI_CALLS: &str = "CARTLOG_HIDE_FI_CALLS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerConfig {
    pub quiet: bool,
    pub show_memleaks: bool,
    pub count_memory_errors: bool,
    pub lint_function_names: bool,
    pub hide_fi_calls: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            show_memleaks: true,
            count_memory_errors: true,
            lint_function_names: true,
            hide_fi_calls: false,
        }
    }
}

impl CheckerConfig {
    /// Defaults with any environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from `lookup`, which maps variable names to
    /// values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key).map_or(default, |raw| parse_flag_loose(&raw, default))
        };
        Self {
            quiet: flag(ENV_QUIET, defaults.quiet),
            show_memleaks: flag(ENV_SHOW_MEMLEAKS, defaults.show_memleaks),
            count_memory_errors: flag(ENV_COUNT_MEMORY_ERRORS, defaults.count_memory_errors),
            lint_function_names: flag(ENV_LINT_FUNCTION_NAMES, defaults.lint_function_names),
            hide_fi_calls: flag(ENV_HIDE_FI_CALLS, defaults.hide_fi_calls),
        }
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    #[must_use]
    pub fn show_memleaks(mut self, show: bool) -> Self {
        self.show_memleaks = show;
        self
    }

    #[must_use]
    pub fn count_memory_errors(mut self, count: bool) -> Self {
        self.count_memory_errors = count;
        self
    }

    #[must_use]
    pub fn lint_function_names(mut self, lint: bool) -> Self {
        self.lint_function_names = lint;
        self
    }

    #[must_use]
    pub fn hide_fi_calls(mut self, hide: bool) -> Self {
        self.hide_fi_calls = hide;
        self
    }
}

/// Parse a boolean switch (case-insensitive). Unrecognised values keep
/// `default`.
#[must_use]
pub fn parse_flag_loose(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_flags() {
        assert!(parse_flag_loose("YES", false));
        assert!(parse_flag_loose(" on ", false));
        assert!(!parse_flag_loose("0", true));
        assert!(parse_flag_loose("maybe", true));
        assert!(!parse_flag_loose("", false));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = CheckerConfig::from_lookup(|key| match key {
            ENV_QUIET => Some("1".to_string()),
            ENV_COUNT_MEMORY_ERRORS => Some("off".to_string()),
            ENV_SHOW_MEMLEAKS => Some("garbage".to_string()),
            ENV_HIDE_FI_CALLS => Some("yes".to_string()),
            _ => None,
        });
        assert!(config.quiet);
        assert!(!config.count_memory_errors);
        assert!(config.show_memleaks);
        assert!(config.lint_function_names);
        assert!(config.hide_fi_calls);
    }
}

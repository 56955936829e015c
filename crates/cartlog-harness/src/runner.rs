//! Check execution over captured log files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cartlog_core::{
    CheckerConfig, DiagnosticObserver, DiagnosticSink, LineSource, LogTest, PidReport,
};
use serde::Serialize;
use thiserror::Error;

use crate::jsonl_source::{JsonlLineSource, SourceError};
use crate::structured_log::{ArtifactIndex, LogEmitter, LogEntry, LogLevel, Verdict};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Verdict for one pid of one log file.
#[derive(Debug, Clone, Serialize)]
pub struct PidResult {
    pub log_file: String,
    pub verdict: Verdict,
    pub report: PidReport,
}

/// Runs the checker over log files with one shared diagnostic sink.
pub struct CheckRunner<'s> {
    sink: &'s DiagnosticSink,
    config: CheckerConfig,
    strict: bool,
    warning_functions: Vec<(String, String)>,
    error_ok: Vec<String>,
    leak_observer: Option<Arc<dyn DiagnosticObserver>>,
}

impl<'s> CheckRunner<'s> {
    #[must_use]
    pub fn new(sink: &'s DiagnosticSink) -> Self {
        Self {
            sink,
            config: CheckerConfig::default(),
            strict: false,
            warning_functions: Vec::new(),
            error_ok: Vec::new(),
            leak_observer: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Check every pid with `abort_on_warning` set.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_warning_function(
        mut self,
        function: impl Into<String>,
        bug_id: impl Into<String>,
    ) -> Self {
        self.warning_functions.push((function.into(), bug_id.into()));
        self
    }

    #[must_use]
    pub fn with_error_ok(mut self, filename: impl Into<String>) -> Self {
        self.error_ok.push(filename.into());
        self
    }

    #[must_use]
    pub fn with_leak_observer(mut self, observer: Arc<dyn DiagnosticObserver>) -> Self {
        self.leak_observer = Some(observer);
        self
    }

    fn checker(&self) -> LogTest<'s> {
        let mut checker = LogTest::with_config(self.sink, self.config);
        for (function, bug_id) in &self.warning_functions {
            checker.set_warning_function(function.clone(), bug_id.clone());
        }
        for filename in &self.error_ok {
            checker.set_error_ok(filename.clone());
        }
        if let Some(observer) = &self.leak_observer {
            checker.set_leak_observer(Arc::clone(observer));
        }
        checker
    }

    /// Check every pid of `source`, labelled `log_file` in the results.
    pub fn check_source<S: LineSource + ?Sized>(
        &self,
        log_file: &str,
        source: &S,
    ) -> Vec<PidResult> {
        let mut checker = self.checker();
        let reports = checker.check_all_pids(source, self.strict);
        if !self.config.quiet {
            checker.show_common_logs();
        }
        reports
            .into_iter()
            .map(|report| PidResult {
                log_file: log_file.to_string(),
                verdict: Verdict::from_outcome(&report.outcome),
                report,
            })
            .collect()
    }

    /// Check each JSONL log file, emitting one run log entry per pid.
    pub fn run(
        &self,
        logs: &[PathBuf],
        emitter: &mut LogEmitter,
    ) -> Result<RunSummary, RunnerError> {
        emitter.emit_entry(
            LogEntry::new(String::new(), LogLevel::Info, "run_start")
                .with_strict(self.strict)
                .with_details(serde_json::json!({ "log_files": logs.len() })),
        )?;

        let mut summary = RunSummary::new(emitter.run_id());
        for path in logs {
            let started = Instant::now();
            let source = JsonlLineSource::open(path)?;
            let log_file = path.display().to_string();
            let results = self.check_source(&log_file, &source);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            for result in &results {
                emitter.emit_entry(pid_entry(result, self.strict, elapsed_ms))?;
            }
            summary.logs.push(path.clone());
            summary.results.extend(results);
        }

        let level = if summary.is_success() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        emitter.emit_entry(
            LogEntry::new(String::new(), level, "run_end").with_details(serde_json::json!({
                "pids": summary.results.len(),
                "passed": summary.count(Verdict::Pass),
                "known_issues": summary.count(Verdict::KnownIssue),
                "failed": summary.count(Verdict::Fail),
            })),
        )?;
        emitter.flush()?;
        Ok(summary)
    }
}

fn pid_entry(result: &PidResult, strict: bool, elapsed_ms: u64) -> LogEntry {
    let report = &result.report;
    let reason = match &report.outcome {
        cartlog_core::Outcome::Pass => None,
        cartlog_core::Outcome::Fail(failure) => Some(failure.details.clone()),
    };
    LogEntry::new(String::new(), result.verdict.level(), "pid_checked")
        .with_pid(&result.log_file, report.pid)
        .with_strict(strict)
        .with_outcome(&report.outcome)
        .with_duration_ms(elapsed_ms)
        .with_details(serde_json::json!({
            "reason": reason,
            "trace_lines": report.trace_lines,
            "non_trace_lines": report.non_trace_lines,
            "memsize": report.memsize.to_string(),
            "err_count": report.err_count,
            "memory_errors": report.memory_errors,
            "leaked_regions": report.leaked_regions,
            "active_descriptors": report.active_descriptors,
            "active_rpcs": report.active_rpcs,
            "have_debug": report.have_debug,
            "fi_triggered": report.fi_triggered,
        }))
}

/// Verdicts of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub logs: Vec<PathBuf>,
    pub results: Vec<PidResult>,
}

impl RunSummary {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            logs: Vec::new(),
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn count(&self, verdict: Verdict) -> usize {
        self.results.iter().filter(|r| r.verdict == verdict).count()
    }

    /// Results that fail the run.
    pub fn failures(&self) -> impl Iterator<Item = &PidResult> {
        self.results.iter().filter(|r| r.verdict == Verdict::Fail)
    }

    /// True when no pid failed. Known issues do not fail a run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Write an artifact index covering the checked logs and `extra` files
    /// (path, kind) to `out`.
    pub fn write_artifact_index(
        &self,
        out: &Path,
        extra: &[(&Path, &str)],
    ) -> Result<ArtifactIndex, RunnerError> {
        let mut index = ArtifactIndex::new(&self.run_id);
        let mut seen = BTreeSet::new();
        for path in &self.logs {
            if seen.insert(path.as_path()) {
                index.add_file(path, "log")?;
            }
        }
        for (path, kind) in extra {
            index.add_file(path, *kind)?;
        }
        std::fs::write(out, index.to_json()?)?;
        Ok(index)
    }
}

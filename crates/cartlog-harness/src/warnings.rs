//! Jenkins warnings-ng issue report.
//!
//! Every added issue rewrites the whole report file, so a run that dies part
//! way still leaves a readable report. While the report is open it also
//! carries a trailing `Tests are still running` issue at ERROR severity;
//! [`WarningsReport::close`] drops it. A report dropped without `close`
//! records `Tests exited without shutting down properly` instead.
//!
//! Issues can also be echoed as GitHub workflow annotations.

use std::io::Write;
use std::path::{Path, PathBuf};

use cartlog_core::{Diagnostic, DiagnosticObserver, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity value used for harness-level problems.
pub const SEVERITY_ERROR: &str = "ERROR";

const STILL_RUNNING: &str = "Tests are still running";
const EXITED_UNCLEANLY: &str = "Tests exited without shutting down properly";

/// One warnings-ng issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub file_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub line_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub message: String,
    /// `LOW`, `NORMAL`, `HIGH` or `ERROR`.
    pub severity: String,
}

impl Issue {
    /// Issue for a checker diagnostic. The message leads with the offending
    /// log text.
    #[must_use]
    pub fn from_diagnostic(diagnostic: &Diagnostic) -> Self {
        Self {
            file_name: diagnostic.filename.clone(),
            issue_type: Some(diagnostic.message.clone()),
            category: None,
            line_start: diagnostic.lineno,
            description: Some(diagnostic.message.clone()),
            message: format!("{}\n{}", diagnostic.text, diagnostic.message),
            severity: diagnostic.severity.report_level().to_string(),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = Some(issue_type.into());
        self
    }

    fn harness(message: &str, line: u32) -> Self {
        Self {
            file_name: file!().to_string(),
            issue_type: None,
            category: None,
            line_start: line,
            description: None,
            message: message.to_string(),
            severity: SEVERITY_ERROR.to_string(),
        }
    }

    fn is_severe(&self) -> bool {
        self.severity == Severity::Error.report_level() || self.severity == SEVERITY_ERROR
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ReportFile {
    issues: Vec<Issue>,
}

/// Which issues are echoed as GitHub annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Annotations {
    #[default]
    Off,
    /// Every issue.
    All,
    /// HIGH and ERROR issues only, annotated with the raw log text.
    ErrorsOnly,
}

#[derive(Debug)]
enum Target {
    File(PathBuf),
    Buffer(String),
}

#[derive(Debug)]
struct State {
    target: Target,
    issues: Vec<Issue>,
    running: bool,
    annotations_out: Vec<String>,
}

/// Warnings report shared by every checker in a run.
#[derive(Debug)]
pub struct WarningsReport {
    state: Mutex<State>,
    annotations: Annotations,
    check: String,
}

impl WarningsReport {
    /// Report written to `path`, rewritten on every change.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let report = Self::with_target(Target::File(path.to_path_buf()));
        report.flush()?;
        Ok(report)
    }

    /// Report kept in memory (for testing).
    #[must_use]
    pub fn to_buffer() -> Self {
        let report = Self::with_target(Target::Buffer(String::new()));
        // Buffer targets cannot fail to flush.
        let _ = report.flush();
        report
    }

    fn with_target(target: Target) -> Self {
        Self {
            state: Mutex::new(State {
                target,
                issues: Vec::new(),
                running: true,
                annotations_out: Vec::new(),
            }),
            annotations: Annotations::Off,
            check: String::from("Log check"),
        }
    }

    /// Echo issues as GitHub annotations naming `check`.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations, check: impl Into<String>) -> Self {
        self.annotations = annotations;
        self.check = check.into();
        self
    }

    /// Record an issue and rewrite the report.
    pub fn add(&self, issue: Issue, raw_text: Option<&str>) -> std::io::Result<()> {
        let annotation = self.annotation_for(&issue, raw_text);
        {
            let mut state = self.state.lock();
            if let Some(annotation) = annotation {
                if matches!(state.target, Target::File(_)) {
                    println!("{annotation}");
                }
                state.annotations_out.push(annotation);
            }
            state.issues.push(issue);
        }
        self.flush()
    }

    fn annotation_for(&self, issue: &Issue, raw_text: Option<&str>) -> Option<String> {
        let message = match self.annotations {
            Annotations::Off => return None,
            Annotations::All => issue.description.as_deref().unwrap_or(&issue.message),
            Annotations::ErrorsOnly if issue.is_severe() => raw_text.unwrap_or(&issue.message),
            Annotations::ErrorsOnly => return None,
        };
        Some(format!(
            "::warning file={},line={},::{}, {}",
            issue.file_name, issue.line_start, self.check, message
        ))
    }

    /// Number of recorded issues, excluding the running marker.
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.state.lock().issues.len()
    }

    #[must_use]
    pub fn issues(&self) -> Vec<Issue> {
        self.state.lock().issues.clone()
    }

    /// Annotations produced so far.
    #[must_use]
    pub fn annotations(&self) -> Vec<String> {
        self.state.lock().annotations_out.clone()
    }

    /// Current report JSON for a buffered report; empty for a file report.
    #[must_use]
    pub fn buffered_json(&self) -> String {
        match &self.state.lock().target {
            Target::File(_) => String::new(),
            Target::Buffer(json) => json.clone(),
        }
    }

    /// Mark the run finished and write the final report.
    pub fn close(&self) -> std::io::Result<usize> {
        let (count, path) = {
            let mut state = self.state.lock();
            state.running = false;
            let path = match &state.target {
                Target::File(path) => Some(path.clone()),
                Target::Buffer(_) => None,
            };
            (state.issues.len(), path)
        };
        self.flush()?;
        if let Some(path) = path {
            println!("Closed JSON file {} with {count} errors", path.display());
        }
        Ok(count)
    }

    fn flush(&self) -> std::io::Result<()> {
        let mut state = self.state.lock();
        let mut file = ReportFile {
            issues: state.issues.clone(),
        };
        if state.running {
            file.issues.push(Issue::harness(STILL_RUNNING, line!()));
        }
        let json = serde_json::to_string_pretty(&file).map_err(std::io::Error::other)?;
        match &mut state.target {
            Target::File(path) => {
                let mut out = std::fs::File::create(path)?;
                out.write_all(json.as_bytes())?;
                out.flush()
            }
            Target::Buffer(buf) => {
                *buf = json;
                Ok(())
            }
        }
    }
}

impl DiagnosticObserver for WarningsReport {
    fn observe(&self, diagnostic: &Diagnostic) {
        // Report writing is best effort; the diagnostic is already printed.
        let _ = self.add(Issue::from_diagnostic(diagnostic), Some(&diagnostic.text));
    }
}

impl Drop for WarningsReport {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.running {
            return;
        }
        state.running = false;
        state.issues.push(Issue::harness(EXITED_UNCLEANLY, line!()));
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic(severity: Severity) -> Diagnostic {
        Diagnostic {
            filename: "src/cart/crt_context.c".to_string(),
            lineno: 88,
            pid: 12,
            severity,
            message: "desc not deregistered".to_string(),
            text: "crt_context_create() ctx 0x...".to_string(),
        }
    }

    fn issues_in(json: &str) -> Vec<serde_json::Value> {
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        parsed["issues"].as_array().unwrap().clone()
    }

    #[test]
    fn open_report_carries_running_marker() {
        let report = WarningsReport::to_buffer();
        report.observe(&diagnostic(Severity::Error));
        let issues = issues_in(&report.buffered_json());
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0]["fileName"], "src/cart/crt_context.c");
        assert_eq!(issues[0]["lineStart"], 88);
        assert_eq!(issues[0]["severity"], "HIGH");
        assert_eq!(issues[0]["type"], "desc not deregistered");
        assert_eq!(
            issues[0]["message"],
            "crt_context_create() ctx 0x...\ndesc not deregistered"
        );
        assert_eq!(issues[1]["message"], STILL_RUNNING);
        assert_eq!(issues[1]["severity"], "ERROR");

        assert_eq!(report.close().unwrap(), 1);
        let issues = issues_in(&report.buffered_json());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn severities_map_to_report_levels() {
        let report = WarningsReport::to_buffer();
        report.observe(&diagnostic(Severity::Warning));
        report.observe(&diagnostic(Severity::Note));
        let severities: Vec<String> = report.issues().into_iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec!["NORMAL", "LOW"]);
    }

    #[test]
    fn annotations_all_and_errors_only() {
        let all = WarningsReport::to_buffer().with_annotations(Annotations::All, "NLT");
        all.observe(&diagnostic(Severity::Note));
        assert_eq!(
            all.annotations(),
            vec!["::warning file=src/cart/crt_context.c,line=88,::NLT, desc not deregistered"]
        );

        let errors = WarningsReport::to_buffer().with_annotations(Annotations::ErrorsOnly, "NLT");
        errors.observe(&diagnostic(Severity::Note));
        errors.observe(&diagnostic(Severity::Error));
        assert_eq!(
            errors.annotations(),
            vec!["::warning file=src/cart/crt_context.c,line=88,::NLT, crt_context_create() ctx 0x..."]
        );
    }

    #[test]
    fn file_report_is_rewritten_and_closed() {
        let path = std::env::temp_dir().join(format!("cartlog-warnings-{}.json", std::process::id()));
        let report = WarningsReport::create(&path).unwrap();
        assert_eq!(issues_in(&std::fs::read_to_string(&path).unwrap()).len(), 1);

        report
            .add(
                Issue::from_diagnostic(&diagnostic(Severity::Warning)).with_category("leak"),
                None,
            )
            .unwrap();
        let issues = issues_in(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0]["category"], "leak");

        report.close().unwrap();
        drop(report);
        let issues = issues_in(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(issues.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dropped_open_report_records_unclean_exit() {
        let path = std::env::temp_dir().join(format!("cartlog-unclean-{}.json", std::process::id()));
        let report = WarningsReport::create(&path).unwrap();
        drop(report);
        let issues = issues_in(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["message"], EXITED_UNCLEANLY);
        let _ = std::fs::remove_file(&path);
    }
}

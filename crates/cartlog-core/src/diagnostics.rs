//! Diagnostic formatting and the shared de-duplicating sink.
//!
//! Diagnostics use the gcc error format so editors and CI annotators can
//! jump straight to the logging statement:
//!
//! ```text
//! src/cart/crt_init.c:120:1: error: desc not deregistered 'crt_init_opt() ...'
//! ```
//!
//! A [`DiagnosticSink`] lives for a whole tool invocation. The exact rendered
//! text of every diagnostic it prints is remembered, and the same text is
//! never printed twice, across pids and across checker runs.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::line::LogLine;

/// Diagnostic severity, rendered lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        }
    }

    /// Severity name used by the Jenkins warnings-ng issue format.
    #[must_use]
    pub const fn report_level(self) -> &'static str {
        match self {
            Self::Error => "HIGH",
            Self::Warning => "NORMAL",
            Self::Note => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem attributed to one log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub filename: String,
    pub lineno: u32,
    pub pid: u32,
    pub severity: Severity,
    pub message: String,
    /// Anonymized text of the offending line.
    pub text: String,
}

impl Diagnostic {
    #[must_use]
    pub fn for_line(line: &LogLine, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            filename: line.filename.clone(),
            lineno: line.lineno,
            pid: line.pid,
            severity,
            message: message.into(),
            text: line.anon_message(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:1: {}: {} '{}'",
            self.filename, self.lineno, self.severity, self.message, self.text
        )
    }
}

/// Receives every diagnostic the sink prints for the first time.
pub trait DiagnosticObserver: Send + Sync {
    fn observe(&self, diagnostic: &Diagnostic);
}

enum Output {
    Stdout,
    Buffer(Vec<u8>),
}

/// Process-wide diagnostic output with content based de-duplication.
pub struct DiagnosticSink {
    shown: Mutex<HashSet<String>>,
    output: Mutex<Output>,
    observer: Option<Arc<dyn DiagnosticObserver>>,
}

impl DiagnosticSink {
    /// Sink printing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_output(Output::Stdout)
    }

    /// Sink collecting output in memory (for testing).
    #[must_use]
    pub fn to_buffer() -> Self {
        Self::with_output(Output::Buffer(Vec::new()))
    }

    fn with_output(output: Output) -> Self {
        Self {
            shown: Mutex::new(HashSet::new()),
            output: Mutex::new(output),
            observer: None,
        }
    }

    /// Forward newly shown diagnostics to `observer` unless a call supplies
    /// its own.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DiagnosticObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Print `diagnostic` if its rendering has not been printed before.
    ///
    /// Returns true when the diagnostic was new.
    pub fn show(
        &self,
        diagnostic: &Diagnostic,
        custom: Option<&dyn DiagnosticObserver>,
    ) -> bool {
        let rendered = diagnostic.to_string();
        if !self.shown.lock().insert(rendered.clone()) {
            return false;
        }
        self.print(&rendered);
        if let Some(observer) = custom {
            observer.observe(diagnostic);
        } else if let Some(observer) = &self.observer {
            observer.observe(diagnostic);
        }
        true
    }

    /// Print a plain line. Not de-duplicated.
    pub fn print(&self, text: &str) {
        // Output is best effort; a closed stdout must not fail a check.
        let mut output = self.output.lock();
        match &mut *output {
            Output::Stdout => {
                let _ = writeln!(std::io::stdout().lock(), "{text}");
            }
            Output::Buffer(buf) => {
                let _ = writeln!(buf, "{text}");
            }
        }
    }

    /// Number of distinct diagnostics printed so far.
    #[must_use]
    pub fn shown_count(&self) -> usize {
        self.shown.lock().len()
    }

    #[must_use]
    pub fn was_shown(&self, rendered: &str) -> bool {
        self.shown.lock().contains(rendered)
    }

    /// Everything printed so far by a buffered sink; empty for stdout.
    #[must_use]
    pub fn buffered_output(&self) -> String {
        match &*self.output.lock() {
            Output::Stdout => String::new(),
            Output::Buffer(buf) => String::from_utf8_lossy(buf).into_owned(),
        }
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("shown", &self.shown_count())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

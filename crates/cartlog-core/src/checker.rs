//! Single-pass consistency checker for CaRT logs.
//!
//! Each pid is checked independently. The checker walks the pid's lines once,
//! in file order, and tracks:
//! - registered descriptors (seeded with the `root` sentinel),
//! - live RPC handles,
//! - live allocations and a high-water byte counter.
//!
//! Violations are printed through the shared [`DiagnosticSink`] as they are
//! found. After the last line the run is classified into one [`Outcome`],
//! highest priority first: log errors, leaked memory, leftover descriptors,
//! known-bug warnings, strict-mode warnings.
//!
//! With fault injection mode on ([`CheckerConfig::hide_fi_calls`]), strict
//! mode skips lines explained by injected allocation failures and instead
//! checks that those failures are logged once, with the DAOS error code.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::config::CheckerConfig;
use crate::dfuse_io::{DFUSE_READ_FILE, DfuseIoReport};
use crate::diagnostics::{Diagnostic, DiagnosticObserver, DiagnosticSink, Severity};
use crate::line::{FaultMark, LineEvent, LogLine, Pointer, ROOT_DESCRIPTOR};
use crate::memsize::HwmCounter;
use crate::outcome::{FailureKind, LogCheckError, Outcome};
use crate::rpc_tally::RpcTally;
use crate::source::LineSource;
use crate::stats::LogStats;
use crate::tracking::OrderedTable;

/// Functions whose warnings are expected during normal shutdown and are not
/// enforced in strict mode.
pub const STRICT_EXEMPT_FUNCTIONS: [&str; 7] = [
    "crt_grp_lc_addr_insert",
    "crt_ctx_epi_abort",
    "crt_rpc_complete",
    "crt_req_timeout_hdlr",
    "crt_req_hg_addr_lookup_cb",
    "crt_progress",
    "crt_context_timeout_check",
];

/// Allocations made here are never freed by the process that logs them.
pub const KNOWN_LEAK_FUNCTION: &str = "initialize_projection";

/// Frees that legitimately release memory allocated under another mask or
/// level, keyed by freeing function and variable name.
const MISMATCH_FREE_OK: [(&str, &str); 6] = [
    ("crt_finalize", "crt_gdata.cg_addr"),
    ("crt_group_psr_set", "grp_priv->gp_psr_phy_addr"),
    ("crt_hdlr_uri_lookup", "tmp_uri"),
    ("crt_rpc_priv_free", "rpc_priv"),
    ("crt_init_opt", "crt_gdata.cg_addr"),
    ("crt_grp_priv_destroy", "grp_priv->gp_psr_phy_addr"),
];

/// Messages shorter than this never trip the function-name lint.
const MIN_LINT_FUNCTION_LEN: usize = 7;

/// Error number DAOS logs for an allocation failure.
const DER_NOMEM_CODE: &str = "-1009";
/// How a `DF_RC` formatted allocation failure ends.
const DER_NOMEM_SUFFIX: &str = "DER_NOMEM(-1009): 'Out of memory'";
/// dfs and dfuse log system errnos rather than DAOS error codes.
const ENOMEM_SUFFIX: &str = ": 12 (Cannot allocate memory)";
/// An allocation failure logged this many lines after the failure site is
/// assumed to be the caller repeating it.
const ALLOC_FAILURE_ECHO_LINES: i64 = 5;

/// Summary of one checked pid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PidReport {
    pub pid: u32,
    pub outcome: Outcome,
    pub trace_lines: u64,
    pub non_trace_lines: u64,
    pub memsize: HwmCounter,
    pub err_count: u64,
    /// Unknown frees, double frees and similar, counted or not.
    pub memory_errors: u64,
    pub have_debug: bool,
    pub leaked_regions: usize,
    pub active_descriptors: usize,
    pub active_rpcs: usize,
    /// An injected allocation failure was seen.
    pub fi_triggered: bool,
}

impl PidReport {
    #[must_use]
    pub fn total_lines(&self) -> u64 {
        self.trace_lines + self.non_trace_lines
    }
}

/// Policy shared by every pid run of one checker.
#[derive(Debug, Clone)]
struct CheckRules {
    config: CheckerConfig,
    /// function -> known bug id
    warning_functions: HashMap<String, String>,
    error_files_ok: HashSet<String>,
    mismatch_free_ok: HashMap<String, HashSet<String>>,
}

/// Log consistency checker.
pub struct LogTest<'s> {
    sink: &'s DiagnosticSink,
    rules: CheckRules,
    leak_observer: Option<Arc<dyn DiagnosticObserver>>,
    stats: LogStats,
    common_shown: bool,
    fi_triggered: bool,
}

impl<'s> LogTest<'s> {
    #[must_use]
    pub fn new(sink: &'s DiagnosticSink) -> Self {
        Self::with_config(sink, CheckerConfig::default())
    }

    #[must_use]
    pub fn with_config(sink: &'s DiagnosticSink, config: CheckerConfig) -> Self {
        let mut mismatch_free_ok: HashMap<String, HashSet<String>> = HashMap::new();
        for (function, variable) in MISMATCH_FREE_OK {
            mismatch_free_ok
                .entry(function.to_string())
                .or_default()
                .insert(variable.to_string());
        }
        Self {
            sink,
            rules: CheckRules {
                config,
                warning_functions: HashMap::new(),
                error_files_ok: HashSet::new(),
                mismatch_free_ok,
            },
            leak_observer: None,
            stats: LogStats::default(),
            common_shown: false,
            fi_triggered: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CheckerConfig {
        &self.rules.config
    }

    /// Treat warnings and errors logged by `function` as the known bug
    /// `bug_id`.
    pub fn set_warning_function(&mut self, function: impl Into<String>, bug_id: impl Into<String>) {
        self.rules
            .warning_functions
            .insert(function.into(), bug_id.into());
    }

    /// Do not report inactive descriptors used in `filename`.
    pub fn set_error_ok(&mut self, filename: impl Into<String>) {
        self.rules.error_files_ok.insert(filename.into());
    }

    /// Accept frees of `variable` in `function` whose mask or level differs
    /// from the allocation.
    pub fn allow_mismatched_free(&mut self, function: impl Into<String>, variable: impl Into<String>) {
        self.rules
            .mismatch_free_ok
            .entry(function.into())
            .or_default()
            .insert(variable.into());
    }

    /// Send leak diagnostics to `observer` instead of the sink's default.
    pub fn set_leak_observer(&mut self, observer: Arc<dyn DiagnosticObserver>) {
        self.leak_observer = Some(observer);
    }

    #[must_use]
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// True once any checked pid logged an injected allocation failure.
    #[must_use]
    pub fn fi_triggered(&self) -> bool {
        self.fi_triggered
    }

    /// Check every pid in `source`, stopping at the first failing pid.
    pub fn check_log_file<S: LineSource + ?Sized>(
        &mut self,
        source: &S,
        abort_on_warning: bool,
    ) -> Result<(), LogCheckError> {
        let mut result = Ok(());
        for pid in source.pids() {
            let report = self.check_pid(source, pid, abort_on_warning);
            if let Err(err) = report.outcome.into_result() {
                result = Err(err);
                break;
            }
        }
        if !self.rules.config.quiet {
            self.show_common_logs();
        }
        result
    }

    /// Check every pid in `source` and return all reports.
    pub fn check_all_pids<S: LineSource + ?Sized>(
        &mut self,
        source: &S,
        abort_on_warning: bool,
    ) -> Vec<PidReport> {
        source
            .pids()
            .into_iter()
            .map(|pid| self.check_pid(source, pid, abort_on_warning))
            .collect()
    }

    /// Check the lines of one pid.
    pub fn check_pid<S: LineSource + ?Sized>(
        &mut self,
        source: &S,
        pid: u32,
        abort_on_warning: bool,
    ) -> PidReport {
        let mut run = PidRun::new(
            &self.rules,
            self.sink,
            self.leak_observer.as_deref(),
            pid,
            abort_on_warning,
        );
        let quiet = self.rules.config.quiet;
        for line in source.lines(pid) {
            if !quiet {
                self.stats.record(line);
            }
            run.process(line);
        }
        let report = run.finish();
        self.fi_triggered |= report.fi_triggered;
        report
    }

    /// Summarize the file reads served by dfuse, per pid and client, and
    /// print one line per client. Other output from the read handler is
    /// noted as "Extra output".
    pub fn check_dfuse_io<S: LineSource + ?Sized>(&mut self, source: &S) -> Vec<DfuseIoReport> {
        let quiet = self.rules.config.quiet;
        let mut reports = Vec::new();
        for pid in source.pids() {
            let mut report = DfuseIoReport::new(pid);
            for line in source.lines(pid) {
                if !quiet {
                    self.stats.record(line);
                }
                if line.filename != DFUSE_READ_FILE {
                    continue;
                }
                match line.event {
                    LineEvent::DfuseRead {
                        start,
                        end,
                        client_pid,
                    } => report.record(client_pid, start, end, line.time_ms),
                    _ => {
                        self.sink.show(
                            &Diagnostic::for_line(line, Severity::Note, "Extra output"),
                            None,
                        );
                    }
                }
            }
            for row in report.render() {
                self.sink.print(&row);
            }
            reports.push(report);
        }
        reports
    }

    /// Print the most common logging locations, once.
    pub fn show_common_logs(&mut self) {
        if self.common_shown {
            return;
        }
        let lines = self.stats.render_common();
        if lines.is_empty() {
            return;
        }
        for line in lines {
            self.sink.print(&line);
        }
        self.common_shown = true;
    }
}

/// State of one pid check.
struct PidRun<'a, 'c> {
    rules: &'c CheckRules,
    sink: &'c DiagnosticSink,
    leak_observer: Option<&'c dyn DiagnosticObserver>,
    pid: u32,
    abort_on_warning: bool,

    /// Registered descriptors; `root` maps to `None`.
    active_desc: OrderedTable<String, Option<&'a LogLine>>,
    active_rpcs: OrderedTable<String, &'a LogLine>,
    regions: OrderedTable<Pointer, &'a LogLine>,
    /// Freed pointer -> (allocating line, freeing line).
    freed: HashMap<Pointer, (&'a LogLine, &'a LogLine)>,
    memsize: HwmCounter,
    error_files: BTreeSet<String>,
    rpc_tally: RpcTally,
    /// Most recent injected allocation failure.
    fi_location: Option<&'a LogLine>,
    fi_triggered: bool,

    err_count: u64,
    memory_errors: u64,
    warnings_strict: bool,
    warnings_mode: bool,
    trace_lines: u64,
    non_trace_lines: u64,
    have_debug: bool,
}

impl<'a, 'c> PidRun<'a, 'c> {
    fn new(
        rules: &'c CheckRules,
        sink: &'c DiagnosticSink,
        leak_observer: Option<&'c dyn DiagnosticObserver>,
        pid: u32,
        abort_on_warning: bool,
    ) -> Self {
        let mut active_desc = OrderedTable::new();
        active_desc.insert(ROOT_DESCRIPTOR.to_string(), None);
        Self {
            rules,
            sink,
            leak_observer,
            pid,
            abort_on_warning,
            active_desc,
            active_rpcs: OrderedTable::new(),
            regions: OrderedTable::new(),
            freed: HashMap::new(),
            memsize: HwmCounter::new(),
            error_files: BTreeSet::new(),
            rpc_tally: RpcTally::default(),
            fi_location: None,
            fi_triggered: false,
            err_count: 0,
            memory_errors: 0,
            warnings_strict: false,
            warnings_mode: false,
            trace_lines: 0,
            non_trace_lines: 0,
            have_debug: false,
        }
    }

    fn show(&self, line: &LogLine, severity: Severity, message: impl Into<String>) {
        self.sink
            .show(&Diagnostic::for_line(line, severity, message), None);
    }

    fn show_leak(&self, line: &LogLine, message: &str) {
        self.sink.show(
            &Diagnostic::for_line(line, Severity::Error, message),
            self.leak_observer,
        );
    }

    fn memory_error(&mut self) {
        self.memory_errors += 1;
        if self.rules.config.count_memory_errors {
            self.err_count += 1;
        }
    }

    fn process(&mut self, line: &'a LogLine) {
        if !self.rules.config.quiet {
            self.rpc_tally.add_line(line);
        }
        self.check_warning_function(line);
        if self.abort_on_warning {
            self.check_strict_mode(line);
        }
        if self.rules.config.lint_function_names {
            self.lint_function_name(line);
        }
        match line.descriptor.as_deref() {
            Some(desc) => self.trace_line(line, desc),
            None => self.non_trace_line(line),
        }
    }

    fn check_warning_function(&mut self, line: &LogLine) {
        if let Some(bug_id) = self.rules.warning_functions.get(&line.function)
            && line.level.is_warning_or_worse()
        {
            self.show(line, Severity::Error, "warning in strict file");
            self.show(line, Severity::Note, format!("Known bug {bug_id}"));
            self.warnings_strict = true;
        }
    }

    fn check_strict_mode(&mut self, line: &'a LogLine) {
        if !line.level.is_warning_or_worse()
            || line.mask.eq_ignore_ascii_case("hg")
            || STRICT_EXEMPT_FUNCTIONS.contains(&line.function.as_str())
        {
            return;
        }
        if self.rules.config.hide_fi_calls && self.explained_by_fault(line) {
            return;
        }
        // SWIM pings fail routinely while ranks shut down.
        if line.is_swim_rpc() {
            return;
        }
        if line.level.is_worse_than_error() {
            self.show(line, Severity::Error, "error in strict mode");
        } else {
            self.show(line, Severity::Error, "warning in strict mode");
        }
        self.warnings_mode = true;
    }

    /// True when an injected fault accounts for `line`. Allocation failure
    /// reports are checked for how they are logged.
    fn explained_by_fault(&mut self, line: &'a LogLine) -> bool {
        match line.fault {
            Some(FaultMark::Site) => return true,
            Some(FaultMark::AllocFail) => {
                self.fi_triggered = true;
                self.fi_location = Some(line);
                return true;
            }
            None => {}
        }
        if line.message.contains(DER_NOMEM_CODE) {
            if let Some(site) = self.fi_location
                && site.filename == line.filename
                && (1..ALLOC_FAILURE_ECHO_LINES)
                    .contains(&(i64::from(line.lineno) - i64::from(site.lineno)))
            {
                self.show(line, Severity::Warning, "Logging allocation failure");
            }
            if !line.message.ends_with(DER_NOMEM_SUFFIX) {
                self.show(line, Severity::Note, "Error does not use DF_RC");
            }
            return true;
        }
        line.message.ends_with(ENOMEM_SUFFIX)
    }

    fn lint_function_name(&self, line: &LogLine) {
        let function = line.function.as_str();
        if function.len() < MIN_LINT_FUNCTION_LEN || !line.message.contains(function) {
            return;
        }
        if line.message.contains(&format!("{function}_internal")) {
            return;
        }
        self.show(line, Severity::Warning, "Logging references function name");
    }

    fn trace_line(&mut self, line: &'a LogLine, descriptor: &'a str) {
        self.trace_lines += 1;
        if line.level.is_debug() {
            self.have_debug = true;
        }

        // A link line is checked against the descriptor it links to.
        let mut desc = descriptor;
        match &line.event {
            LineEvent::New { parent } => {
                if let Some(prior) = self.active_desc.get(desc) {
                    if let Some(prior) = prior {
                        self.show(prior, Severity::Error, "not deregistered");
                    }
                    self.show(line, Severity::Error, "already exists");
                    self.err_count += 1;
                }
                if !self.active_desc.contains(parent.as_str()) {
                    self.show(line, Severity::Error, "add with bad parent");
                    if let Some(alloc) = self.regions.get(parent.as_str()) {
                        self.show(alloc, Severity::Note, "used as parent without registering");
                    }
                    self.err_count += 1;
                }
                self.active_desc.insert(desc.to_string(), Some(line));
            }
            LineEvent::Link { parent } => {
                if !self.active_desc.contains(parent.as_str()) {
                    self.show(line, Severity::Error, "link with bad parent");
                    self.err_count += 1;
                }
                desc = parent.as_str();
            }
            LineEvent::NewRpc => {
                self.active_rpcs.insert(desc.to_string(), line);
            }
            _ => {}
        }

        match line.event {
            LineEvent::Dereg => {
                if self.active_desc.remove(desc).is_none() {
                    self.show(line, Severity::Error, "invalid desc remove");
                    self.err_count += 1;
                }
            }
            LineEvent::DeregRpc => {
                if self.active_rpcs.remove(desc).is_none() {
                    self.show(line, Severity::Error, "invalid rpc remove");
                    self.err_count += 1;
                }
            }
            _ => {
                // Without debug output registrations may have been filtered,
                // so absence proves nothing.
                if self.have_debug
                    && !self.active_desc.contains(desc)
                    && !self.active_rpcs.contains(desc)
                    && !self.rules.error_files_ok.contains(&line.filename)
                {
                    self.show(line, Severity::Error, "inactive desc");
                    if let Some(alloc) = self.regions.get(descriptor) {
                        self.show(
                            alloc,
                            Severity::Note,
                            "Used as descriptor without registering",
                        );
                    }
                    self.error_files.insert(line.filename.clone());
                    self.err_count += 1;
                }
            }
        }
    }

    fn non_trace_line(&mut self, line: &'a LogLine) {
        self.non_trace_lines += 1;
        match &line.event {
            LineEvent::Calloc { pointer, size } => {
                if let Some(prior) = self.regions.get(pointer) {
                    self.show(prior, Severity::Error, "new allocation seen for same pointer");
                    self.memory_error();
                }
                self.regions.insert(pointer.clone(), line);
                self.memsize.add(*size);
            }
            LineEvent::Free { pointer, variable } => {
                self.free(line, pointer, variable.as_deref());
            }
            LineEvent::Realloc {
                new_pointer,
                old_pointer,
                new_size,
                old_size,
            } => {
                self.realloc(line, new_pointer, old_pointer, *new_size, *old_size);
            }
            _ => {}
        }
    }

    fn free(&mut self, line: &'a LogLine, pointer: &Pointer, variable: Option<&str>) {
        if pointer.is_nil() {
            return;
        }
        // Descriptors are heap objects: freeing one ends its registration.
        self.active_desc.remove(pointer.as_str());

        if let Some(alloc) = self.regions.remove(pointer) {
            self.check_free_matches(alloc, line, variable);
            self.memsize.subtract(alloc.allocation_size());
            self.freed.insert(pointer.clone(), (alloc, line));
        } else if let Some(&(alloc, first)) = self.freed.get(pointer) {
            self.show(alloc, Severity::Error, "double-free allocation point");
            self.show(first, Severity::Error, "1st double-free location");
            self.show(line, Severity::Error, "2nd double-free location");
            self.memory_error();
        } else {
            self.show(line, Severity::Error, "free of unknown memory");
            self.memory_error();
        }
    }

    fn check_free_matches(&self, alloc: &LogLine, free: &LogLine, variable: Option<&str>) {
        let mask_differs = alloc.mask != free.mask;
        let level_differs = alloc.level != free.level;
        if !mask_differs && !level_differs {
            return;
        }
        if let Some(variable) = variable
            && self
                .rules
                .mismatch_free_ok
                .get(&free.function)
                .is_some_and(|vars| vars.contains(variable))
        {
            return;
        }
        if mask_differs {
            self.show(alloc, Severity::Warning, "mask mismatch in alloc/free");
            self.show(free, Severity::Warning, "mask mismatch in alloc/free");
        }
        if level_differs {
            self.show(alloc, Severity::Warning, "level mismatch in alloc/free");
            self.show(free, Severity::Warning, "level mismatch in alloc/free");
        }
    }

    fn realloc(
        &mut self,
        line: &'a LogLine,
        new_pointer: &Pointer,
        old_pointer: &Pointer,
        new_size: i64,
        old_size: i64,
    ) {
        let mut unknown_old = false;
        if !new_pointer.is_nil() && !old_pointer.is_nil() {
            match self.regions.get(old_pointer) {
                Some(orig) => {
                    let expected = orig.allocation_size();
                    if ![0, expected, new_size].contains(&old_size) {
                        self.show(line, Severity::Error, "realloc used invalid old size");
                        self.memory_error();
                    }
                    self.memsize.subtract(expected);
                }
                None => unknown_old = true,
            }
        }

        self.regions.insert(new_pointer.clone(), line);
        self.memsize.add(new_size);

        if old_pointer != new_pointer && !old_pointer.is_nil() {
            match self.regions.remove(old_pointer) {
                Some(orig) => {
                    self.freed.insert(old_pointer.clone(), (orig, line));
                }
                None => unknown_old = true,
            }
        }

        if unknown_old {
            self.show(line, Severity::Error, "realloc of unknown memory");
            self.memory_error();
        }
    }

    fn finish(mut self) -> PidReport {
        self.active_desc.remove(ROOT_DESCRIPTOR);
        let quiet = self.rules.config.quiet;

        let total_lines = self.trace_lines + self.non_trace_lines;
        if !quiet {
            let p_trace = if total_lines == 0 {
                0.0
            } else {
                self.trace_lines as f64 * 100.0 / total_lines as f64
            };
            self.sink.print(&format!(
                "Pid {}, {} lines total, {} trace ({:.2}%)",
                self.pid, total_lines, self.trace_lines, p_trace
            ));
            if self.memsize.has_data() {
                self.sink.print(&format!("Memsize: {}", self.memsize));
            }
            if !self.have_debug {
                self.sink
                    .print("DEBUG not enabled, No log consistency checking possible");
            }
            for row in self.rpc_tally.render() {
                self.sink.print(&row);
            }
        }

        let mut leaked_regions = 0;
        if self.rules.config.show_memleaks {
            for (pointer, line) in self.regions.ordered() {
                if line.function == KNOWN_LEAK_FUNCTION {
                    continue;
                }
                if self.active_desc.remove(pointer.as_str()).is_some() {
                    self.show_leak(line, "descriptor not freed");
                } else {
                    self.show_leak(line, "memory not freed");
                }
                leaked_regions += 1;
            }
        }

        for line in self.active_desc.ordered().into_iter().filter_map(|(_, line)| line) {
            self.show_leak(line, "desc not deregistered");
        }
        for (_, line) in self.active_rpcs.ordered() {
            self.show(line, Severity::Error, "rpc not deregistered");
        }

        let outcome = self.classify(leaked_regions);
        PidReport {
            pid: self.pid,
            outcome,
            trace_lines: self.trace_lines,
            non_trace_lines: self.non_trace_lines,
            memsize: self.memsize,
            err_count: self.err_count,
            memory_errors: self.memory_errors,
            have_debug: self.have_debug,
            leaked_regions,
            active_descriptors: self.active_desc.len(),
            active_rpcs: self.active_rpcs.len(),
            fi_triggered: self.fi_triggered,
        }
    }

    fn classify(&self, leaked_regions: usize) -> Outcome {
        if !self.error_files.is_empty() || self.err_count > 0 {
            let mut details = format!("{} errors", self.err_count);
            if !self.error_files.is_empty() {
                let files: Vec<&str> = self.error_files.iter().map(String::as_str).collect();
                details.push_str(&format!(", inactive descriptors in {}", files.join(", ")));
            }
            Outcome::fail(FailureKind::LogError, details)
        } else if leaked_regions > 0 {
            Outcome::fail(
                FailureKind::NotAllFreed,
                format!("{leaked_regions} allocations not freed"),
            )
        } else if !self.active_desc.is_empty() {
            Outcome::fail(
                FailureKind::ActiveDescriptors,
                format!("{} descriptors still registered", self.active_desc.len()),
            )
        } else if self.warnings_strict {
            Outcome::fail(
                FailureKind::WarningStrict,
                "warnings from known-bug functions",
            )
        } else if self.warnings_mode {
            Outcome::fail(FailureKind::WarningMode, "warnings logged in strict mode")
        } else {
            Outcome::Pass
        }
    }
}

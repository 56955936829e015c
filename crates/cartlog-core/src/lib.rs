//! Consistency checking for CaRT logs.
//!
//! This crate provides:
//! - Parsed line model: levels, descriptor/RPC/allocation events, pointers
//! - The per-pid checker: lifecycle tracking, strict-mode warnings, leaks
//! - Diagnostics: gcc-style, de-duplicated, with pluggable observers
//! - Verdicts: one prioritized [`Outcome`] per pid
//! - dfuse read summaries per client
//!
//! Reading log files is left to a [`LineSource`] implementation.

#![forbid(unsafe_code)]

pub mod checker;
pub mod config;
pub mod dfuse_io;
pub mod diagnostics;
pub mod level;
pub mod line;
pub mod memsize;
pub mod outcome;
pub mod rpc_tally;
pub mod source;
pub mod stats;
mod tracking;

pub use checker::{LogTest, PidReport};
pub use config::CheckerConfig;
pub use dfuse_io::{DfuseIoReport, RegionCounter};
pub use diagnostics::{Diagnostic, DiagnosticObserver, DiagnosticSink, Severity};
pub use level::LogLevel;
pub use line::{FaultMark, LineEvent, LogLine, Pointer};
pub use memsize::HwmCounter;
pub use outcome::{Failure, FailureKind, LogCheckError, Outcome};
pub use source::{LineSource, MemoryLineSource};

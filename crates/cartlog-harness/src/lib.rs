//! Test harness around the CaRT log checker.
//!
//! This crate provides:
//! - JSONL line source: parsed log lines read from disk
//! - Warnings report: Jenkins warnings-ng issue file and GitHub annotations
//! - Structured run log: JSONL records of every pid verdict
//! - Runner: checks a set of log files and summarizes the verdicts

#![forbid(unsafe_code)]

pub mod jsonl_source;
pub mod runner;
pub mod structured_log;
pub mod warnings;

pub use jsonl_source::{JsonlLineSource, SourceError};
pub use runner::{CheckRunner, PidResult, RunSummary, RunnerError};
pub use structured_log::Verdict;
pub use warnings::{Annotations, Issue, WarningsReport};

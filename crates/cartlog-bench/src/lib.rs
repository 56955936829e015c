//! Synthetic CaRT log workloads for benchmarking the checker.

#![forbid(unsafe_code)]

use cartlog_core::line::ROOT_DESCRIPTOR;
use cartlog_core::{LineEvent, LogLevel, LogLine, MemoryLineSource};

/// Balanced workload for one pid: `contexts` descriptors, each with
/// `rpcs_per_context` RPCs and one allocation per RPC.
#[must_use]
pub fn balanced_pid(pid: u32, contexts: u32, rpcs_per_context: u32) -> Vec<LogLine> {
    let at = |lineno: u32, level: LogLevel| {
        LogLine::new("src/cart/crt_rpc.c", lineno, pid, level)
            .with_mask("rpc")
            .with_function("crt_req_send")
    };
    let mut lines = Vec::new();
    for ctx in 0..contexts {
        let desc = format!("0x7f00{ctx:08x}");
        lines.push(
            at(10, LogLevel::Debug)
                .traced(&desc)
                .with_event(LineEvent::new_desc(ROOT_DESCRIPTOR)),
        );
        for rpc in 0..rpcs_per_context {
            let handle = format!("0x7e{ctx:06x}{rpc:06x}");
            let buf = format!("0x55{ctx:06x}{rpc:06x}");
            lines.push(
                at(20, LogLevel::Debug)
                    .traced(&handle)
                    .with_rpc("0x1000001")
                    .with_event(LineEvent::NewRpc),
            );
            lines.push(at(21, LogLevel::Debug).with_event(LineEvent::calloc(buf.as_str(), 256)));
            lines.push(
                at(22, LogLevel::Debug)
                    .traced(&handle)
                    .with_message("rpc sent to rank 3"),
            );
            lines.push(at(23, LogLevel::Debug).with_event(LineEvent::free(buf.as_str())));
            lines.push(
                at(24, LogLevel::Debug)
                    .traced(&handle)
                    .with_event(LineEvent::DeregRpc),
            );
        }
        lines.push(at(30, LogLevel::Debug).traced(&desc).with_event(LineEvent::Dereg));
    }
    lines
}

/// Balanced workload across `pids` processes.
#[must_use]
pub fn balanced_log(pids: u32, contexts: u32, rpcs_per_context: u32) -> MemoryLineSource {
    (1..=pids)
        .flat_map(|pid| balanced_pid(pid, contexts, rpcs_per_context))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartlog_core::{CheckerConfig, DiagnosticSink, LogTest};

    #[test]
    fn balanced_workload_passes() {
        let source = balanced_log(2, 3, 4);
        assert_eq!(source.len(), 2 * 3 * (2 + 4 * 5));
        let sink = DiagnosticSink::to_buffer();
        let mut checker = LogTest::with_config(&sink, CheckerConfig::default().quiet(true));
        assert!(checker.check_log_file(&source, true).is_ok(), "{}", sink.buffered_output());
        assert_eq!(sink.shown_count(), 0);
    }
}

//! Per-opcode RPC state transition tally.
//!
//! Only lines logged by the RPC engine functions in [`RPC_STATE_FUNCTIONS`]
//! are counted. An RPC's opcode is taken from its allocation line and
//! remembered until it is deallocated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::line::{LineEvent, LogLine};

/// Functions that log RPC state transitions.
pub const RPC_STATE_FUNCTIONS: [&str; 7] = [
    "crt_hg_req_send",
    "crt_hg_req_destroy",
    "crt_rpc_complete",
    "crt_rpc_priv_alloc",
    "crt_rpc_handler_common",
    "crt_req_send",
    "crt_hg_req_send_cb",
];

const SUCCESS_RESULT: &str = "DER_SUCCESS";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeCounts {
    pub allocated: u64,
    pub submitted: u64,
    pub sent: u64,
    pub completed: u64,
    pub deallocated: u64,
    /// Completions by result name.
    pub results: BTreeMap<String, u64>,
}

/// Counts RPC state transitions by opcode.
#[derive(Debug, Clone, Default)]
pub struct RpcTally {
    /// descriptor -> opcode of live RPCs
    live: HashMap<String, String>,
    counts: BTreeMap<String, OpcodeCounts>,
    result_names: BTreeSet<String>,
}

impl RpcTally {
    pub fn add_line(&mut self, line: &LogLine) {
        if !RPC_STATE_FUNCTIONS.contains(&line.function.as_str()) {
            return;
        }
        let Some(desc) = line.descriptor.as_deref() else {
            return;
        };
        if let LineEvent::NewRpc = line.event {
            let opcode = line
                .rpc
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |rpc| rpc.opcode.clone());
            self.counts.entry(opcode.clone()).or_default().allocated += 1;
            self.live.insert(desc.to_string(), opcode);
            return;
        }

        let opcode = match line.event {
            LineEvent::DeregRpc => self.live.remove(desc),
            LineEvent::RpcSubmitted | LineEvent::RpcSent | LineEvent::RpcCompleted { .. } => {
                self.live.get(desc).cloned()
            }
            _ => return,
        };
        // Transitions of RPCs allocated before the log starts are dropped.
        let Some(opcode) = opcode else {
            return;
        };
        let counts = self.counts.entry(opcode).or_default();
        match &line.event {
            LineEvent::DeregRpc => counts.deallocated += 1,
            LineEvent::RpcSubmitted => counts.submitted += 1,
            LineEvent::RpcSent => counts.sent += 1,
            LineEvent::RpcCompleted { result } => {
                counts.completed += 1;
                *counts.results.entry(result.clone()).or_default() += 1;
                self.result_names.insert(result.clone());
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn counts(&self, opcode: &str) -> Option<&OpcodeCounts> {
        self.counts.get(opcode)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Opcodes whose allocations and deallocations do not balance.
    #[must_use]
    pub fn unbalanced(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, c)| c.allocated != c.deallocated)
            .map(|(op, c)| {
                format!(
                    "ERROR: Opcode {op}: Alloc'd Total = {}, Dealloc'd Total = {}",
                    c.allocated, c.deallocated
                )
            })
            .collect()
    }

    /// Result columns, `DER_SUCCESS` first when any completion was seen.
    fn result_columns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .result_names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != SUCCESS_RESULT)
            .collect();
        if !self.result_names.is_empty() {
            names.insert(0, SUCCESS_RESULT);
        }
        names
    }

    /// Right-aligned table of counts followed by one error line per
    /// unbalanced opcode.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        if self.counts.is_empty() {
            return Vec::new();
        }
        let results = self.result_columns();
        let mut headers: Vec<String> = [
            "OPCODE",
            "ALLOCATED",
            "SUBMITTED",
            "SENT",
            "COMPLETED",
            "DEALLOCATED",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();
        headers.extend(results.iter().map(|name| format!("-{name}")));

        let rows: Vec<Vec<String>> = self
            .counts
            .iter()
            .map(|(op, c)| {
                let mut row = vec![
                    op.clone(),
                    c.allocated.to_string(),
                    c.submitted.to_string(),
                    c.sent.to_string(),
                    c.completed.to_string(),
                    c.deallocated.to_string(),
                ];
                row.extend(
                    results
                        .iter()
                        .map(|name| c.results.get(*name).map_or_else(String::new, u64::to_string)),
                );
                row
            })
            .collect();

        let widths: Vec<usize> = (0..headers.len())
            .map(|col| {
                rows.iter()
                    .map(|row| row[col].len())
                    .chain(std::iter::once(headers[col].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let join = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:>width$}"))
                .collect::<Vec<_>>()
                .join("  ")
        };

        let mut out = vec!["Opcode State Transition Tally".to_string(), join(&headers)];
        out.extend(rows.iter().map(|row| join(row)));
        out.extend(self.unbalanced());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;

    fn rpc_line(function: &str, desc: &str, event: LineEvent) -> LogLine {
        LogLine::new("src/cart/crt_rpc.c", 10, 1, LogLevel::Debug)
            .with_function(function)
            .traced(desc)
            .with_event(event)
    }

    fn alloc(desc: &str, opcode: &str) -> LogLine {
        rpc_line("crt_rpc_priv_alloc", desc, LineEvent::NewRpc).with_rpc(opcode)
    }

    fn dealloc(desc: &str) -> LogLine {
        rpc_line("crt_hg_req_destroy", desc, LineEvent::DeregRpc)
    }

    fn completed(desc: &str, result: &str) -> LogLine {
        rpc_line(
            "crt_rpc_complete",
            desc,
            LineEvent::RpcCompleted {
                result: result.to_string(),
            },
        )
    }

    #[test]
    fn tallies_by_opcode() {
        let mut tally = RpcTally::default();
        tally.add_line(&alloc("0xa1", "0x1000001"));
        tally.add_line(&alloc("0xa2", "0x1000001"));
        tally.add_line(&dealloc("0xa1"));
        tally.add_line(&alloc("0xb1", "0x2000002"));
        tally.add_line(&dealloc("0xb1"));

        let counts = tally.counts("0x1000001").unwrap();
        assert_eq!(counts.allocated, 2);
        assert_eq!(counts.deallocated, 1);
        assert_eq!(
            tally.unbalanced(),
            vec!["ERROR: Opcode 0x1000001: Alloc'd Total = 2, Dealloc'd Total = 1".to_string()]
        );
        let rendered = tally.render();
        assert_eq!(rendered[0], "Opcode State Transition Tally");
        assert_eq!(rendered.len(), 5);
    }

    #[test]
    fn full_lifecycle_with_result_columns() {
        let mut tally = RpcTally::default();
        for desc in ["0xc1", "0xc2", "0xc3"] {
            tally.add_line(&alloc(desc, "0x1000001"));
            tally.add_line(&rpc_line("crt_req_send", desc, LineEvent::RpcSubmitted));
            tally.add_line(&rpc_line("crt_hg_req_send", desc, LineEvent::RpcSent));
        }
        tally.add_line(&completed("0xc1", "DER_TIMEDOUT"));
        tally.add_line(&completed("0xc2", "DER_SUCCESS"));
        tally.add_line(&completed("0xc3", "DER_SUCCESS"));
        for desc in ["0xc1", "0xc2", "0xc3"] {
            tally.add_line(&dealloc(desc));
        }

        let counts = tally.counts("0x1000001").unwrap();
        assert_eq!(
            (
                counts.allocated,
                counts.submitted,
                counts.sent,
                counts.completed,
                counts.deallocated
            ),
            (3, 3, 3, 3, 3)
        );
        assert_eq!(counts.results.get("DER_SUCCESS"), Some(&2));
        assert_eq!(counts.results.get("DER_TIMEDOUT"), Some(&1));

        let rendered = tally.render();
        assert_eq!(rendered.len(), 3);
        let header: Vec<&str> = rendered[1].split_whitespace().collect();
        assert_eq!(
            header,
            vec![
                "OPCODE",
                "ALLOCATED",
                "SUBMITTED",
                "SENT",
                "COMPLETED",
                "DEALLOCATED",
                "-DER_SUCCESS",
                "-DER_TIMEDOUT"
            ]
        );
        let row: Vec<&str> = rendered[2].split_whitespace().collect();
        assert_eq!(row, vec!["0x1000001", "3", "3", "3", "3", "3", "2", "1"]);
    }

    #[test]
    fn lines_outside_rpc_engine_are_ignored() {
        let mut tally = RpcTally::default();
        tally.add_line(
            &rpc_line("crt_context_create", "0xd1", LineEvent::NewRpc).with_rpc("0x1000001"),
        );
        assert!(tally.is_empty());
    }

    #[test]
    fn transitions_of_unknown_rpcs_are_ignored() {
        let mut tally = RpcTally::default();
        tally.add_line(&dealloc("0xe1"));
        tally.add_line(&completed("0xe1", "DER_SUCCESS"));
        assert!(tally.is_empty());
        assert!(tally.render().is_empty());
    }
}

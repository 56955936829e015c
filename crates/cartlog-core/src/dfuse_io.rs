//! Summary of file reads served by dfuse.
//!
//! Reads are grouped per client process. Each read extends the current
//! region when it starts on the byte after the previous one ended; any other
//! read closes the region and starts a new one.

use std::fmt;

use serde::Serialize;

/// Source file of the dfuse read handler.
pub const DFUSE_READ_FILE: &str = "src/client/dfuse/ops/read.c";

const MIB: u64 = 1024 * 1024;

/// Contiguous inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionContig {
    pub start: u64,
    pub end: u64,
}

impl RegionContig {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

impl fmt::Display for RegionContig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Reads of one client, merged into contiguous regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionCounter {
    reads: u64,
    closed: Vec<RegionContig>,
    current: RegionContig,
    first_ms: Option<u64>,
    last_ms: Option<u64>,
}

impl RegionCounter {
    #[must_use]
    pub fn new(start: u64, end: u64, time_ms: Option<u64>) -> Self {
        Self {
            reads: 1,
            closed: Vec::new(),
            current: RegionContig { start, end },
            first_ms: time_ms,
            last_ms: time_ms,
        }
    }

    /// Record one more read.
    pub fn add(&mut self, start: u64, end: u64, time_ms: Option<u64>) {
        self.reads += 1;
        if self.current.end.checked_add(1) == Some(start) {
            self.current.end = end;
        } else {
            self.closed.push(self.current);
            self.current = RegionContig { start, end };
        }
        if time_ms.is_some() {
            self.first_ms = self.first_ms.or(time_ms);
            self.last_ms = time_ms;
        }
    }

    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// All regions in read order, the open one last.
    #[must_use]
    pub fn regions(&self) -> Vec<RegionContig> {
        let mut all = self.closed.clone();
        all.push(self.current);
        all
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.regions().iter().map(RegionContig::size).sum()
    }

    /// Seconds between the first and last timestamped read.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        match (self.first_ms, self.last_ms) {
            (Some(first), Some(last)) => last.saturating_sub(first) as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for RegionCounter {
    /// `{reads} reads, {size} {secs}Seconds {regions}`, where repeated
    /// consecutive regions collapse to `{region}x{count}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut runs: Vec<(RegionContig, u64)> = Vec::new();
        for region in self.regions() {
            match runs.last_mut() {
                Some((prev, count)) if *prev == region => *count += 1,
                _ => runs.push((region, 1)),
            }
        }
        let data = runs
            .iter()
            .map(|(region, count)| format!("{region}x{count}"))
            .collect::<Vec<_>>()
            .join(",");

        let bytes = self.bytes();
        let size = if bytes % MIB == 0 {
            format!("{}Mb", bytes / MIB)
        } else {
            format!("{:.1}Mb", bytes as f64 / MIB as f64)
        };
        write!(
            f,
            "{} reads, {size} {:.1}Seconds {data}",
            self.reads,
            self.elapsed_secs()
        )
    }
}

/// Read summary of one client of one dfuse process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DfuseClient {
    pub client_pid: u32,
    pub reads: RegionCounter,
}

/// Read summary of one dfuse process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DfuseIoReport {
    pub pid: u32,
    /// Clients in order of their first read.
    pub clients: Vec<DfuseClient>,
}

impl DfuseIoReport {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            clients: Vec::new(),
        }
    }

    pub fn record(&mut self, client_pid: u32, start: u64, end: u64, time_ms: Option<u64>) {
        match self.clients.iter_mut().find(|c| c.client_pid == client_pid) {
            Some(client) => client.reads.add(start, end, time_ms),
            None => self.clients.push(DfuseClient {
                client_pid,
                reads: RegionCounter::new(start, end, time_ms),
            }),
        }
    }

    /// One `{client}:{summary}` line per client.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|c| format!("{}:{}", c.client_pid, c.reads))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_reads_merge() {
        let mut counter = RegionCounter::new(0, 0xfff, Some(1_000));
        counter.add(0x1000, 0x1fff, Some(1_250));
        counter.add(0x2000, 0xfffff, Some(3_500));
        assert_eq!(counter.reads(), 3);
        assert_eq!(counter.regions(), vec![RegionContig { start: 0, end: 0xfffff }]);
        assert_eq!(counter.bytes(), MIB);
        assert_eq!(counter.to_string(), "3 reads, 1Mb 2.5Seconds 0x0-0xfffffx1");
    }

    #[test]
    fn rereads_collapse_into_counts() {
        let mut counter = RegionCounter::new(0, 0x7ffff, None);
        counter.add(0, 0x7ffff, None);
        counter.add(0x100000, 0x17ffff, None);
        assert_eq!(counter.regions().len(), 3);
        assert_eq!(
            counter.to_string(),
            "3 reads, 1.5Mb 0.0Seconds 0x0-0x7ffffx2,0x100000-0x17ffffx1"
        );
    }

    #[test]
    fn report_keeps_first_read_order() {
        let mut report = DfuseIoReport::new(10);
        report.record(44, 0, 0xfff, None);
        report.record(12, 0, 0xfff, None);
        report.record(44, 0x1000, 0x1fff, None);
        let clients: Vec<u32> = report.clients.iter().map(|c| c.client_pid).collect();
        assert_eq!(clients, vec![44, 12]);
        assert_eq!(report.clients[0].reads.reads(), 2);
        assert!(report.render()[0].starts_with("44:2 reads, "));
    }
}

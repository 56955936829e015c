//! Line sources feeding the checker.

use std::collections::BTreeSet;

use crate::line::LogLine;

/// Ordered, replayable access to parsed log lines.
pub trait LineSource {
    /// Every pid that logged at least one line.
    fn pids(&self) -> BTreeSet<u32>;

    /// Lines logged by `pid`, in file order.
    fn lines(&self, pid: u32) -> Box<dyn Iterator<Item = &LogLine> + '_>;
}

/// In-memory line source.
#[derive(Debug, Clone, Default)]
pub struct MemoryLineSource {
    lines: Vec<LogLine>,
}

impl MemoryLineSource {
    #[must_use]
    pub fn new(lines: Vec<LogLine>) -> Self {
        Self { lines }
    }

    pub fn push(&mut self, line: LogLine) {
        self.lines.push(line);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl FromIterator<LogLine> for MemoryLineSource {
    fn from_iter<T: IntoIterator<Item = LogLine>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl LineSource for MemoryLineSource {
    fn pids(&self) -> BTreeSet<u32> {
        self.lines.iter().map(|line| line.pid).collect()
    }

    fn lines(&self, pid: u32) -> Box<dyn Iterator<Item = &LogLine> + '_> {
        Box::new(self.lines.iter().filter(move |line| line.pid == pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;

    #[test]
    fn lines_are_partitioned_by_pid_in_order() {
        let source: MemoryLineSource = [(1, 10), (2, 11), (1, 12), (3, 13), (1, 14)]
            .into_iter()
            .map(|(pid, lineno)| LogLine::new("src/f.c", lineno, pid, LogLevel::Info))
            .collect();

        assert_eq!(source.pids().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        let linenos: Vec<u32> = source.lines(1).map(|line| line.lineno).collect();
        assert_eq!(linenos, vec![10, 12, 14]);
        assert_eq!(source.lines(9).count(), 0);
    }
}

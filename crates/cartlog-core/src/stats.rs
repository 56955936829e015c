//! Logging volume statistics.

use std::collections::HashMap;
use std::hash::Hash;

use crate::level::LogLevel;
use crate::line::LogLine;

const TOP_N: usize = 10;
const MIN_REPORTED: u64 = 10;

/// Counts lines by location, mask and level.
#[derive(Debug, Clone, Default)]
pub struct LogStats {
    count: u64,
    locations: HashMap<String, u64>,
    masks: HashMap<String, u64>,
    levels: HashMap<LogLevel, u64>,
}

impl LogStats {
    pub fn record(&mut self, line: &LogLine) {
        self.count += 1;
        *self.locations.entry(line.location()).or_default() += 1;
        *self.masks.entry(line.mask.clone()).or_default() += 1;
        *self.levels.entry(line.level).or_default() += 1;
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Most common locations, highest count first.
    #[must_use]
    pub fn top_locations(&self) -> Vec<(String, u64)> {
        most_common(&self.locations)
    }

    /// Report lines for the most frequent locations, masks and levels.
    /// Empty when nothing was recorded.
    #[must_use]
    pub fn render_common(&self) -> Vec<String> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut out = vec![
            format!("Parsed {} lines of logs", self.count),
            "Most common logging locations".to_string(),
        ];
        for (loc, count) in most_common(&self.locations) {
            out.push(format!(
                "Logging used {count} times at {loc} ({:.1}%)",
                self.percent(count)
            ));
        }
        out.push("Most common facilities".to_string());
        for (mask, count) in most_common(&self.masks) {
            out.push(format!("{mask}: {count} ({:.1}%)", self.percent(count)));
        }
        out.push("Most common levels".to_string());
        for (level, count) in most_common(&self.levels) {
            out.push(format!("{level}: {count} ({:.1}%)", self.percent(count)));
        }
        out
    }

    fn percent(&self, count: u64) -> f64 {
        100.0 * count as f64 / self.count as f64
    }
}

fn most_common<K: Clone + Ord + Hash>(counts: &HashMap<K, u64>) -> Vec<(K, u64)> {
    let mut entries: Vec<(K, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .take(TOP_N)
        .take_while(|(_, count)| *count >= MIN_REPORTED)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_frequent_entries_are_reported() {
        let mut stats = LogStats::default();
        for _ in 0..12 {
            stats.record(&LogLine::new("src/a.c", 1, 1, LogLevel::Debug).with_mask("rpc"));
        }
        for _ in 0..3 {
            stats.record(&LogLine::new("src/b.c", 2, 1, LogLevel::Info).with_mask("hg"));
        }
        assert_eq!(stats.count(), 15);
        assert_eq!(stats.top_locations(), vec![("src/a.c:1".to_string(), 12)]);

        let lines = stats.render_common();
        assert_eq!(lines[0], "Parsed 15 lines of logs");
        assert!(lines.contains(&"Logging used 12 times at src/a.c:1 (80.0%)".to_string()));
        assert!(lines.contains(&"rpc: 12 (80.0%)".to_string()));
        assert!(lines.contains(&"DBUG: 12 (80.0%)".to_string()));
        assert!(!lines.iter().any(|l| l.contains("src/b.c")));
    }

    #[test]
    fn empty_stats_render_nothing() {
        assert!(LogStats::default().render_common().is_empty());
    }
}

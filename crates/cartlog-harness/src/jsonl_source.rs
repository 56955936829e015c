//! Line source reading pre-parsed log lines from JSONL files.
//!
//! Each non-empty line of the file is one serialized [`LogLine`]. Lines are
//! grouped by pid on load and keep their file order within each pid.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use cartlog_core::{LineSource, LogLine};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: invalid log line: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Log lines loaded from JSONL, grouped by pid.
#[derive(Debug, Clone, Default)]
pub struct JsonlLineSource {
    by_pid: BTreeMap<u32, Vec<LogLine>>,
    total: usize,
}

impl JsonlLineSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read(BufReader::new(file), path)
    }

    /// Parse from any reader; I/O errors are attributed to `<reader>`.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, SourceError> {
        Self::read(reader, Path::new("<reader>"))
    }

    fn read(reader: impl BufRead, path: &Path) -> Result<Self, SourceError> {
        let mut loaded = Self::default();
        for (index, text) in reader.lines().enumerate() {
            let text = text.map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let line: LogLine = serde_json::from_str(text).map_err(|source| SourceError::Parse {
                line: index + 1,
                source,
            })?;
            loaded.by_pid.entry(line.pid).or_default().push(line);
            loaded.total += 1;
        }
        Ok(loaded)
    }

    /// Number of lines across all pids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl LineSource for JsonlLineSource {
    fn pids(&self) -> BTreeSet<u32> {
        self.by_pid.keys().copied().collect()
    }

    fn lines(&self, pid: u32) -> Box<dyn Iterator<Item = &LogLine> + '_> {
        match self.by_pid.get(&pid) {
            Some(lines) => Box::new(lines.iter()),
            None => Box::new(std::iter::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
{"filename":"src/cart/crt_init.c","lineno":10,"pid":7,"level":"DBUG","descriptor":"0xa","event":{"kind":"new","parent":"root"}}
{"filename":"src/cart/crt_init.c","lineno":11,"pid":3,"level":"INFO","message":"hello"}

{"filename":"src/cart/crt_init.c","lineno":12,"pid":7,"level":"DBUG","descriptor":"0xa","event":{"kind":"dereg"}}
"#;

    #[test]
    fn groups_lines_by_pid_in_order() {
        let source = JsonlLineSource::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.pids().into_iter().collect::<Vec<_>>(), vec![3, 7]);
        let linenos: Vec<u32> = source.lines(7).map(|l| l.lineno).collect();
        assert_eq!(linenos, vec![10, 12]);
        assert_eq!(source.lines(99).count(), 0);
    }

    #[test]
    fn parse_errors_carry_line_number() {
        let bad = "{\"filename\":\"a.c\",\"lineno\":1,\"pid\":1,\"level\":\"INFO\"}\n{not json}\n";
        let err = JsonlLineSource::from_reader(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, SourceError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = JsonlLineSource::open(Path::new("/nonexistent/cartlog.jsonl")).unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/cartlog.jsonl"));
    }
}

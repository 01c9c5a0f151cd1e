// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistence sinks for cycle counters and the error log
//!
//! Counters are a small overwrite-only document, the error log an
//! append-only sequence of lines. Both are reloaded at startup. Failures are
//! reported as [`PersistenceError`]; callers in the monitor treat them as
//! best effort and keep their in-memory state.
//!
//! ## Components
//!
//! * **File sinks** (`file`): YAML counters document and a plain-text log file
//! * **Memory sinks** (`memory`): in-process sinks with failure injection

pub mod file;
pub mod memory;

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::{FileCounterStore, FileErrorLog};
pub use memory::{MemoryCounterStore, MemoryErrorLog};

/// Timestamp layout of a persisted log line
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default number of log lines per page
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed counters document {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Pass/fail cycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub good_count: u64,
    pub fail_count: u64,
}

/// One line of the error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: NaiveDateTime,
    pub message: String,
}

impl ErrorLogEntry {
    /// Entry stamped with the current local time
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            message: message.into(),
        }
    }

    /// Persisted form, `YYYY-MM-DD HH:MM:SS - message`
    pub fn to_line(&self) -> String {
        format!(
            "{} - {}",
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            self.message
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let (stamp, message) = line.split_once(" - ")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            timestamp,
            message: message.to_string(),
        })
    }
}

/// Overwrite-only storage of the counters
pub trait CounterStore: Send {
    fn load(&mut self) -> Result<Counters, PersistenceError>;
    fn save(&mut self, counters: &Counters) -> Result<(), PersistenceError>;
}

/// Append-only storage of error log lines
pub trait ErrorLogSink: Send {
    fn append(&mut self, entry: &ErrorLogEntry) -> Result<(), PersistenceError>;
    fn count_entries(&self) -> Result<u64, PersistenceError>;
    fn clear(&mut self) -> Result<(), PersistenceError>;
    /// Every persisted line, oldest first
    fn read_lines(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Paging and filtering of the error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Case-insensitive substring every returned line must contain
    pub filter: Option<String>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    /// Oldest first when true, newest first otherwise
    pub ascending: bool,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            filter: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            ascending: false,
        }
    }
}

/// One page of error log lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    /// Number of lines matching the filter, across all pages
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub entries: Vec<String>,
}

/// Apply `query` to log lines stored oldest first
pub fn query_lines(mut lines: Vec<String>, query: &LogQuery) -> LogPage {
    if !query.ascending {
        lines.reverse();
    }

    if let Some(filter) = query.filter.as_deref().filter(|f| !f.is_empty()) {
        let needle = filter.to_lowercase();
        lines.retain(|line| line.to_lowercase().contains(&needle));
    }

    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    let total = lines.len();
    let entries = lines
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    LogPage {
        total,
        page,
        page_size,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("2025-01-01 00:00:{i:02} - entry {i}")).collect()
    }

    #[test]
    fn newest_first_by_default() {
        let page = query_lines(lines(5), &LogQuery::default());
        assert_eq!(page.total, 5);
        assert!(page.entries[0].ends_with("entry 5"));
        assert!(page.entries[4].ends_with("entry 1"));
    }

    #[test]
    fn pages_are_one_based() {
        let query = LogQuery {
            page: 2,
            page_size: 2,
            ascending: true,
            ..LogQuery::default()
        };
        let page = query_lines(lines(5), &query);
        assert_eq!(page.total, 5);
        assert_eq!(page.entries.len(), 2);
        assert!(page.entries[0].ends_with("entry 3"));
        assert!(page.entries[1].ends_with("entry 4"));

        let beyond = query_lines(lines(5), &LogQuery { page: 9, ..query });
        assert!(beyond.entries.is_empty());
        assert_eq!(beyond.total, 5);
    }

    #[test]
    fn filter_is_case_insensitive_and_counts_matches() {
        let mut all = lines(3);
        all.push("2025-01-01 00:01:00 - Leak detected".to_string());
        let query = LogQuery {
            filter: Some("LEAK".to_string()),
            ..LogQuery::default()
        };
        let page = query_lines(all, &query);
        assert_eq!(page.total, 1);
        assert!(page.entries[0].contains("Leak detected"));
    }

    #[test]
    fn log_line_round_trip() {
        let entry = ErrorLogEntry {
            timestamp: NaiveDateTime::parse_from_str("2025-03-04 05:06:07", LOG_TIMESTAMP_FORMAT)
                .unwrap(),
            message: "Product rejected - pressure drop".to_string(),
        };
        let line = entry.to_line();
        assert_eq!(line, "2025-03-04 05:06:07 - Product rejected - pressure drop");
        assert_eq!(ErrorLogEntry::parse_line(&line), Some(entry));
        assert_eq!(ErrorLogEntry::parse_line("garbage"), None);
    }
}

// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the pressure-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! File-backed persistence sinks

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::{CounterStore, Counters, ErrorLogEntry, ErrorLogSink, PersistenceError};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Counters stored as a YAML document, rewritten on every save
pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CounterStore for FileCounterStore {
    fn load(&mut self) -> Result<Counters, PersistenceError> {
        if !self.path.exists() {
            debug!("No counters file at {:?}, starting from zero", self.path);
            return Ok(Counters::default());
        }
        let contents = fs::read_to_string(&self.path).map_err(io_error(&self.path))?;
        serde_yml::from_str(&contents).map_err(|e| PersistenceError::Format {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn save(&mut self, counters: &Counters) -> Result<(), PersistenceError> {
        let yaml = serde_yml::to_string(counters).map_err(|e| PersistenceError::Format {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        // Write beside the target then rename so a crash never leaves half a document
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, yaml).map_err(io_error(&staging))?;
        fs::rename(&staging, &self.path).map_err(io_error(&self.path))?;
        Ok(())
    }
}

/// Error log kept as one text line per entry
pub struct FileErrorLog {
    path: PathBuf,
}

impl FileErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ErrorLogSink for FileErrorLog {
    fn append(&mut self, entry: &ErrorLogEntry) -> Result<(), PersistenceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error(&self.path))?;
        writeln!(file, "{}", entry.to_line()).map_err(io_error(&self.path))
    }

    fn count_entries(&self) -> Result<u64, PersistenceError> {
        Ok(self.read_lines()?.len() as u64)
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        File::create(&self.path).map_err(io_error(&self.path))?;
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(io_error(&self.path))?;
        BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_error(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn counters_survive_a_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.yaml");

        let mut store = FileCounterStore::new(&path);
        assert_eq!(store.load().unwrap(), Counters::default());

        let counters = Counters {
            good_count: 41,
            fail_count: 3,
        };
        store.save(&counters).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let mut reopened = FileCounterStore::new(&path);
        assert_eq!(reopened.load().unwrap(), counters);
    }

    #[test]
    fn malformed_counters_are_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.yaml");
        fs::write(&path, "good_count: [not a number").unwrap();

        let err = FileCounterStore::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Format { .. }), "{err}");
    }

    #[test]
    fn log_appends_counts_and_clears() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let mut log = FileErrorLog::new(&path);
        assert_eq!(log.count_entries().unwrap(), 0);

        log.append(&ErrorLogEntry::now("Leak detected")).unwrap();
        log.append(&ErrorLogEntry::now("Product rejected")).unwrap();
        assert_eq!(log.count_entries().unwrap(), 2);

        let lines = log.read_lines().unwrap();
        assert!(lines[0].ends_with(" - Leak detected"));
        assert!(ErrorLogEntry::parse_line(&lines[1]).is_some());

        // A fresh handle sees the persisted count
        assert_eq!(FileErrorLog::new(&path).count_entries().unwrap(), 2);

        log.clear().unwrap();
        assert_eq!(log.count_entries().unwrap(), 0);
    }

    #[test]
    fn blank_lines_are_not_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.log");
        fs::write(&path, "2025-01-01 00:00:00 - a\n\n   \n2025-01-01 00:00:01 - b\n").unwrap();
        assert_eq!(FileErrorLog::new(&path).count_entries().unwrap(), 2);
    }

    #[test]
    fn unwritable_location_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("counters.yaml");
        let err = FileCounterStore::new(&path)
            .save(&Counters::default())
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}

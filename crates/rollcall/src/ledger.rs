//! Per-session attendance ledger: a CSV file, one row per person.
//!
//! The file is append-only. The set of names already present is kept in
//! memory, seeded from the file when it is opened, so the duplicate check
//! never re-reads the file. A single writer per file is assumed.

use chrono::{DateTime, FixedOffset};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: [&str; 2] = ["Name", "Time"];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger CSV on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    /// `HH:MM:SS` in the ledger's timezone.
    pub time: String,
}

pub struct Ledger {
    path: PathBuf,
    recorded: HashSet<String>,
    /// Existing file did not end in a newline.
    needs_newline: bool,
}

/// `Attendance_YYYYMMDD_HHMMSS.csv`
pub fn session_file_name(started: &DateTime<FixedOffset>) -> String {
    format!("Attendance_{}.csv", started.format("%Y%m%d_%H%M%S"))
}

pub fn time_of_day(at: &DateTime<FixedOffset>) -> String {
    at.format("%H:%M:%S").to_string()
}

impl Ledger {
    /// Start the ledger for a session beginning at `started`.
    ///
    /// Creates `dir` if needed. If the session file already exists it is
    /// reopened rather than truncated.
    pub fn create(dir: &Path, started: &DateTime<FixedOffset>) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir).map_err(|source| LedgerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(session_file_name(started));
        if path.exists() {
            return Self::open(&path);
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| LedgerError::Io { path: path.clone(), source })?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|source| LedgerError::Csv { path: path.clone(), source })?;
        writer
            .flush()
            .map_err(|source| LedgerError::Io { path: path.clone(), source })?;

        tracing::info!(path = %path.display(), "attendance ledger created");
        Ok(Self {
            path,
            recorded: HashSet::new(),
            needs_newline: false,
        })
    }

    /// Reopen an existing ledger, remembering every name already in it.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(contents.as_bytes());

        let mut recorded = HashSet::new();
        for row in reader.records() {
            let row = row.map_err(|source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some(name) = row.get(0).filter(|n| !n.is_empty()) {
                recorded.insert(name.to_string());
            }
        }

        tracing::info!(path = %path.display(), names = recorded.len(), "attendance ledger opened");
        Ok(Self {
            path: path.to_path_buf(),
            recorded,
            needs_newline: !contents.is_empty() && !contents.ends_with('\n'),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recorded.contains(name)
    }

    /// Number of people recorded this session.
    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    /// Append `name` at `at` unless it is already recorded.
    ///
    /// Returns the new row, or `None` if the name was already present.
    pub fn record_if_new(
        &mut self,
        name: &str,
        at: &DateTime<FixedOffset>,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        if self.contains(name) {
            return Ok(None);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            time: time_of_day(at),
        };
        self.append(&record)?;
        self.recorded.insert(record.name.clone());
        Ok(Some(record))
    }

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io { path: self.path.clone(), source };

        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(io_err)?;
        if self.needs_newline {
            file.write_all(b"\n").map_err(io_err)?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record([record.name.as_str(), record.time.as_str()])
            .map_err(|source| LedgerError::Csv { path: self.path.clone(), source })?;
        writer.flush().map_err(io_err)?;

        self.needs_newline = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn npt() -> FixedOffset {
        FixedOffset::east_opt(345 * 60).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        npt().with_ymd_and_hms(2024, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_session_file_name() {
        assert_eq!(session_file_name(&at(9, 5, 7)), "Attendance_20240314_090507.csv");
    }

    #[test]
    fn test_create_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create(&dir.path().join("attendance"), &at(9, 0, 0)).unwrap();
        assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), "Name,Time\n");
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn test_record_if_new_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::create(dir.path(), &at(9, 0, 0)).unwrap();

        let first = ledger.record_if_new("ALICE", &at(9, 1, 2)).unwrap();
        assert_eq!(
            first,
            Some(AttendanceRecord { name: "ALICE".into(), time: "09:01:02".into() })
        );
        assert_eq!(ledger.record_if_new("ALICE", &at(9, 3, 0)).unwrap(), None);
        assert!(ledger.record_if_new("BOB", &at(9, 4, 0)).unwrap().is_some());

        let contents = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents, "Name,Time\nALICE,09:01:02\nBOB,09:04:00\n");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_reopened_ledger_never_re_adds_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut ledger = Ledger::create(dir.path(), &at(9, 0, 0)).unwrap();
            ledger.record_if_new("ALICE", &at(9, 1, 0)).unwrap();
            ledger.path().to_path_buf()
        };

        let mut reopened = Ledger::open(&path).unwrap();
        assert!(reopened.contains("ALICE"));
        assert!(!reopened.contains("Name"), "header is not a person");
        assert_eq!(reopened.record_if_new("ALICE", &at(10, 0, 0)).unwrap(), None);

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.matches("ALICE").count(), 1);
    }

    #[test]
    fn test_create_reuses_existing_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Ledger::create(dir.path(), &at(9, 0, 0)).unwrap();
        first.record_if_new("ALICE", &at(9, 0, 1)).unwrap();

        let second = Ledger::create(dir.path(), &at(9, 0, 0)).unwrap();
        assert!(second.contains("ALICE"));
    }

    #[test]
    fn test_append_after_file_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Attendance_legacy.csv");
        std::fs::write(&path, "Name,Time\n\nALICE,08:00:00").unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.contains("ALICE"));
        ledger.record_if_new("BOB", &at(8, 30, 0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("ALICE,08:00:00\nBOB,08:30:00\n"), "got {contents:?}");
    }

    #[test]
    fn test_unwritable_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::create(dir.path(), &at(9, 0, 0)).unwrap();
        std::fs::remove_file(ledger.path()).unwrap();
        std::fs::create_dir(ledger.path()).unwrap();

        let err = ledger.record_if_new("ALICE", &at(9, 1, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
        assert!(!ledger.contains("ALICE"));
    }
}

//! First-sight attendance: the local ledger is authoritative, the
//! spreadsheet mirror is best-effort.

use crate::ledger::{Ledger, LedgerError};
use crate::sheets::RowSink;
use chrono::{DateTime, FixedOffset, Utc};

pub struct Attendance {
    ledger: Ledger,
    mirror: Option<Box<dyn RowSink>>,
    offset: FixedOffset,
}

impl Attendance {
    pub fn new(ledger: Ledger, mirror: Option<Box<dyn RowSink>>, offset: FixedOffset) -> Self {
        Self { ledger, mirror, offset }
    }

    /// Record `name` now if it has not been seen this session.
    ///
    /// Returns whether a new record was written. Only ledger failures
    /// propagate; mirror failures are logged.
    pub fn record_if_new(&mut self, name: &str) -> Result<bool, LedgerError> {
        let now = Utc::now().with_timezone(&self.offset);
        self.record_at(name, &now)
    }

    pub fn record_at(&mut self, name: &str, at: &DateTime<FixedOffset>) -> Result<bool, LedgerError> {
        let Some(record) = self.ledger.record_if_new(name, at)? else {
            return Ok(false);
        };
        tracing::info!(name = %record.name, time = %record.time, "attendance recorded");

        match self.mirror.as_mut() {
            Some(sink) => match sink.append_row(&[record.name.as_str(), record.time.as_str()]) {
                Ok(()) => tracing::info!(name = %record.name, "appended to spreadsheet"),
                Err(e) => tracing::warn!(name = %record.name, error = %e, "error appending to spreadsheet"),
            },
            None => tracing::debug!("spreadsheet mirror not connected, skipping append"),
        }
        Ok(true)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::SheetError;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Rows = Rc<RefCell<Vec<Vec<String>>>>;

    struct RecordingSink {
        rows: Rows,
        fail: bool,
    }

    impl RowSink for RecordingSink {
        fn append_row(&mut self, row: &[&str]) -> Result<(), SheetError> {
            self.rows.borrow_mut().push(row.iter().map(|s| s.to_string()).collect());
            if self.fail {
                Err(SheetError::Append("HTTP 403".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(fail: bool) -> (tempfile::TempDir, Attendance, Rows) {
        let dir = tempfile::tempdir().unwrap();
        let offset = FixedOffset::east_opt(345 * 60).unwrap();
        let started = offset.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap();
        let ledger = Ledger::create(dir.path(), &started).unwrap();
        let rows = Rows::default();
        let sink = RecordingSink { rows: rows.clone(), fail };
        (dir, Attendance::new(ledger, Some(Box::new(sink)), offset), rows)
    }

    #[test]
    fn test_new_record_is_mirrored_once() {
        let (_dir, mut attendance, rows) = setup(false);
        let at = FixedOffset::east_opt(345 * 60)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 14, 9, 15, 30)
            .unwrap();

        assert!(attendance.record_at("ALICE", &at).unwrap());
        assert!(!attendance.record_at("ALICE", &at).unwrap());

        assert_eq!(*rows.borrow(), vec![vec!["ALICE".to_string(), "09:15:30".to_string()]]);
    }

    #[test]
    fn test_mirror_failure_does_not_block_ledger() {
        let (_dir, mut attendance, rows) = setup(true);

        assert!(attendance.record_if_new("BOB").unwrap());
        assert_eq!(rows.borrow().len(), 1);
        assert!(attendance.ledger().contains("BOB"));

        let contents = std::fs::read_to_string(attendance.ledger().path()).unwrap();
        assert!(contents.lines().any(|l| l.starts_with("BOB,")), "got {contents:?}");
    }

    #[test]
    fn test_without_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let offset = FixedOffset::east_opt(0).unwrap();
        let ledger = Ledger::create(dir.path(), &Utc::now().with_timezone(&offset)).unwrap();
        let mut attendance = Attendance::new(ledger, None, offset);
        assert!(attendance.record_if_new("CAROL").unwrap());
        assert!(!attendance.record_if_new("CAROL").unwrap());
    }
}

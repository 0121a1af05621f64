use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::Local;
use parking_lot::Mutex;
use rust_xlsxwriter::{Format, Workbook};
use tracing::{debug, info, warn};

use crate::error::Error;

const SHEET_NAME: &str = "Attendance";
const HEADERS: [&str; 4] = ["Name", "Department", "Date", "Status"];

#[derive(Debug, Clone, PartialEq)]
struct LedgerRow {
    name: String,
    department: String,
    date: String,
    status: String,
}

/// Durable at-most-once daily attendance ledger backed by `attendance.xlsx`.
///
/// Every write runs the full read-modify-write under one process-wide lock:
/// load the existing rows, scan for `(name, today)`, rebuild the workbook
/// with the appended row, serialize to a sibling temp file, fsync, and
/// atomically rename over the target. An observer of the file therefore sees
/// either the old workbook or the new one, never a partial write.
///
/// A zero-byte or unreadable workbook is deleted and the call proceeds as a
/// fresh create; the ledger file on disk is always the authority, the
/// in-session "marked today" set is only an advisory cache on top of it.
pub struct AttendanceLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AttendanceLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `(name, department, today, status)` unless a row for
    /// `(name, today)` already exists. Returns `true` only when a new row
    /// was durably written.
    pub fn mark_attendance(&self, name: &str, department: &str, status: &str) -> Result<bool, Error> {
        let _guard = self.write_lock.lock();
        let today = today();
        let mut rows = self.load_rows()?;

        // The snapshot below is the one the new workbook is built from, so
        // this single scan covers both duplicate checks of the write
        // protocol: no other writer can slip in while the lock is held.
        if rows.iter().any(|r| r.name == name && r.date == today) {
            debug!("{name} already marked for today, skipping");
            return Ok(false);
        }

        rows.push(LedgerRow {
            name: name.to_string(),
            department: department.to_string(),
            date: today,
            status: status.to_string(),
        });

        let buffer = build_workbook(&rows)?;
        self.publish(&buffer)?;
        info!("{name} marked as {status}");
        Ok(true)
    }

    /// Names with a row dated today. Empty when no ledger exists yet.
    pub fn marked_today(&self) -> Result<HashSet<String>, Error> {
        let _guard = self.write_lock.lock();
        let today = today();
        let rows = self.load_rows()?;
        Ok(rows.into_iter().filter(|r| r.date == today).map(|r| r.name).collect())
    }

    fn load_rows(&self) -> Result<Vec<LedgerRow>, Error> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Storage(format!("cannot stat {}: {e}", self.path.display()))),
        };
        if len == 0 {
            warn!("attendance workbook is empty, recreating it");
            self.discard_corrupt()?;
            return Ok(Vec::new());
        }

        let mut workbook: Xlsx<_> = match open_workbook(&self.path) {
            Ok(wb) => wb,
            Err(e) => {
                warn!("attendance workbook is unreadable ({e}), recreating it");
                self.discard_corrupt()?;
                return Ok(Vec::new());
            }
        };
        let range = match workbook.worksheet_range(SHEET_NAME) {
            Ok(range) => range,
            // Foreign workbook without our sheet: nothing recorded yet.
            Err(_) => return Ok(Vec::new()),
        };
        let rows = range
            .rows()
            .skip(1)
            .map(|cells| LedgerRow {
                name: cell_text(cells, 0),
                department: cell_text(cells, 1),
                date: cell_text(cells, 2),
                status: cell_text(cells, 3),
            })
            .filter(|row| !row.name.is_empty())
            .collect();
        Ok(rows)
    }

    fn discard_corrupt(&self) -> Result<(), Error> {
        fs::remove_file(&self.path).map_err(|e| {
            Error::Corruption(format!("cannot remove unreadable {}: {e}", self.path.display()))
        })
    }

    fn publish(&self, buffer: &[u8]) -> Result<(), Error> {
        let tmp = self.path.with_extension("xlsx.tmp");
        let write_result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(buffer)?;
            file.sync_all()?;
            Ok::<(), std::io::Error>(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Storage(format!("cannot write {}: {e}", tmp.display())));
        }
        // Atomic on POSIX; on hosts where rename cannot replace in one step
        // this degrades to replace-rename with a correspondingly weaker
        // crash guarantee.
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Storage(format!(
                "cannot publish {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn today() -> String {
    Local::now().date_naive().to_string()
}

fn cell_text(cells: &[Data], index: usize) -> String {
    match cells.get(index) {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn build_workbook(rows: &[LedgerRow]) -> Result<Vec<u8>, Error> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).map_err(xlsx_error)?;

    let bold = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold).map_err(xlsx_error)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_string(r, 0, &row.name).map_err(xlsx_error)?;
        sheet.write_string(r, 1, &row.department).map_err(xlsx_error)?;
        sheet.write_string(r, 2, &row.date).map_err(xlsx_error)?;
        sheet.write_string(r, 3, &row.status).map_err(xlsx_error)?;
    }
    workbook.save_to_buffer().map_err(xlsx_error)
}

fn xlsx_error(e: rust_xlsxwriter::XlsxError) -> Error {
    Error::Storage(format!("workbook serialization failed: {e}"))
}

//! Monthly attendance ledger.
//!
//! One CSV file per calendar month (`Attendance_<Month>_<Year>.csv`). The
//! header is `Name, Roll Number` followed by one `DD-MM` column per day of
//! the month; each student row holds the time of their first sighting on
//! each day. Every update is a whole-file load, mutate, save.
//!
//! The sheet is the deduplication mechanism for the per-frame recognition
//! signal: a day cell is only ever written while it is empty, so repeated
//! sightings converge on the first recorded time.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NAME_HEADER: &str = "Name";
pub const ROLL_HEADER: &str = "Roll Number";
const FIXED_COLUMNS: usize = 2;
const DAY_LABEL_FORMAT: &str = "%d-%m";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("date column {0} missing from ledger")]
    DateColumnMissing(String),
    #[error("ledger {0} does not exist")]
    SheetMissing(String),
    #[error("malformed ledger {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("name and roll number must both be non-empty")]
    EmptyIdentity,
    #[error("ledger io on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger csv on {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

impl LedgerError {
    /// The sheet does not (yet) have a schema for the requested day. Fatal for
    /// one marking attempt, not for the caller.
    pub fn is_schema_gap(&self) -> bool {
        matches!(self, Self::DateColumnMissing(_) | Self::SheetMissing(_))
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result of a marking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Existing student, first sighting today.
    Marked { time: String },
    /// Existing student already has a time for today; nothing written.
    AlreadyMarked { time: String },
    /// Student appended as a new row with today's time.
    NewStudent { time: String },
}

impl MarkOutcome {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::AlreadyMarked { .. })
    }
}

/// Result of [`Ledger::ensure_sheet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetStatus {
    Created { days: usize },
    Migrated { added: usize },
    Unchanged,
}

/// First day of the month containing `date`.
pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

/// Last day of the month containing `date`: go to the 28th, step four days
/// into the next month, back up to its first day, then one day more.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let twenty_eighth = first_day_of_month(date) + Duration::days(27);
    let spill = twenty_eighth + Duration::days(4);
    first_day_of_month(spill) - Duration::days(1)
}

/// `DD-MM` column label for a day.
pub fn day_label(date: NaiveDate) -> String {
    date.format(DAY_LABEL_FORMAT).to_string()
}

/// Day labels for every day of the month containing `date`, in order.
pub fn month_day_labels(date: NaiveDate) -> Vec<String> {
    let last = last_day_of_month(date);
    first_day_of_month(date)
        .iter_days()
        .take_while(|d| *d <= last)
        .map(day_label)
        .collect()
}

/// `Attendance_<FullMonthName>_<Year>.csv`
pub fn ledger_file_name(date: NaiveDate) -> String {
    format!("Attendance_{}.csv", date.format("%B_%Y"))
}

/// One student row. `days` is aligned with the sheet's day columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub name: String,
    pub roll_number: String,
    days: Vec<String>,
}

impl StudentRecord {
    /// Value for day column `idx`; empty when unset.
    pub fn day(&self, idx: usize) -> &str {
        self.days.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// In-memory attendance table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    days: Vec<String>,
    /// Day label -> index into `days`, rebuilt whenever columns change.
    columns: HashMap<String, usize>,
    rows: Vec<StudentRecord>,
}

impl Sheet {
    /// Empty sheet with a column for every day of `date`'s month.
    pub fn for_month(date: NaiveDate) -> Self {
        Self::with_days(month_day_labels(date), Vec::new())
    }

    fn with_days(days: Vec<String>, rows: Vec<StudentRecord>) -> Self {
        let mut sheet = Self {
            days,
            columns: HashMap::new(),
            rows,
        };
        sheet.reindex();
        sheet
    }

    fn reindex(&mut self) {
        self.columns.clear();
        for (idx, label) in self.days.iter().enumerate().filter(|(_, l)| !l.is_empty()) {
            // First occurrence wins, matching a left-to-right header scan.
            self.columns.entry(label.clone()).or_insert(idx);
        }
    }

    /// Read a sheet from a ledger CSV file.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| LedgerError::csv(path, e))?;

        let mut records = reader.records();
        let header = match records.next() {
            Some(rec) => rec.map_err(|e| LedgerError::csv(path, e))?,
            None => {
                return Err(LedgerError::Malformed {
                    path: path.display().to_string(),
                    reason: "file is empty".into(),
                })
            }
        };

        if header.get(0) != Some(NAME_HEADER) || header.get(1) != Some(ROLL_HEADER) {
            return Err(LedgerError::Malformed {
                path: path.display().to_string(),
                reason: format!("header must start with {NAME_HEADER:?}, {ROLL_HEADER:?}"),
            });
        }

        let mut days: Vec<String> = header.iter().skip(FIXED_COLUMNS).map(str::to_string).collect();

        let mut rows = Vec::new();
        for rec in records {
            let rec = rec.map_err(|e| LedgerError::csv(path, e))?;
            rows.push(StudentRecord {
                name: rec.get(0).unwrap_or("").to_string(),
                roll_number: rec.get(1).unwrap_or("").to_string(),
                days: rec.iter().skip(FIXED_COLUMNS).map(str::to_string).collect(),
            });
        }

        // Cells beyond the header get blank-titled columns so they survive a save.
        let width = rows.iter().map(|r| r.days.len()).max().unwrap_or(0);
        if width > days.len() {
            tracing::warn!(
                path = %path.display(),
                extra = width - days.len(),
                "ledger rows extend past the header"
            );
            days.resize(width, String::new());
        }

        Ok(Self::with_days(days, rows))
    }

    /// Write the whole sheet to `path` via a sibling temporary file, so the
    /// ledger is replaced in one rename.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(|e| LedgerError::csv(&tmp, e))?;
            writer
                .write_record(self.header())
                .map_err(|e| LedgerError::csv(&tmp, e))?;
            for row in &self.rows {
                let record = [row.name.as_str(), row.roll_number.as_str()]
                    .into_iter()
                    .chain((0..self.days.len()).map(|i| row.day(i)));
                writer.write_record(record).map_err(|e| LedgerError::csv(&tmp, e))?;
            }
            writer.flush().map_err(|e| LedgerError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| LedgerError::io(path, e))
    }

    /// Full header row: `Name`, `Roll Number`, then the day labels.
    pub fn header(&self) -> Vec<&str> {
        [NAME_HEADER, ROLL_HEADER]
            .into_iter()
            .chain(self.days.iter().map(String::as_str))
            .collect()
    }

    pub fn day_labels(&self) -> &[String] {
        &self.days
    }

    pub fn rows(&self) -> &[StudentRecord] {
        &self.rows
    }

    /// Append a column for every day of `date`'s month that the header lacks.
    /// Existing columns keep their order and contents. Returns the number of
    /// columns added.
    pub fn add_missing_days(&mut self, date: NaiveDate) -> usize {
        let missing: Vec<String> = month_day_labels(date)
            .into_iter()
            .filter(|label| !self.columns.contains_key(label))
            .collect();
        let added = missing.len();
        self.days.extend(missing);
        self.reindex();
        added
    }

    fn find_row(&self, name: &str, roll_number: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.name == name && r.roll_number == roll_number)
    }

    /// Cell for a student on a day label, if both exist.
    pub fn cell(&self, name: &str, roll_number: &str, label: &str) -> Option<&str> {
        let col = *self.columns.get(label)?;
        let row = self.find_row(name, roll_number)?;
        Some(self.rows[row].day(col))
    }

    /// Record a sighting at `now`. Only writes into an empty cell.
    pub fn mark(&mut self, name: &str, roll_number: &str, now: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        if name.is_empty() || roll_number.is_empty() {
            return Err(LedgerError::EmptyIdentity);
        }

        let label = day_label(now.date());
        let time = now.format(TIME_FORMAT).to_string();
        let col = *self
            .columns
            .get(&label)
            .ok_or(LedgerError::DateColumnMissing(label))?;

        match self.find_row(name, roll_number) {
            Some(idx) => {
                let row = &mut self.rows[idx];
                if row.days.len() < self.days.len() {
                    row.days.resize(self.days.len(), String::new());
                }
                let cell = &mut row.days[col];
                if cell.is_empty() {
                    *cell = time.clone();
                    Ok(MarkOutcome::Marked { time })
                } else {
                    Ok(MarkOutcome::AlreadyMarked { time: cell.clone() })
                }
            }
            None => {
                let mut days = vec![String::new(); self.days.len()];
                days[col] = time.clone();
                self.rows.push(StudentRecord {
                    name: name.to_string(),
                    roll_number: roll_number.to_string(),
                    days,
                });
                Ok(MarkOutcome::NewStudent { time })
            }
        }
    }
}

/// File-backed ledger for one calendar month.
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
    path: PathBuf,
    month: NaiveDate,
}

impl Ledger {
    /// Ledger for the month containing `date`, stored under `dir`.
    pub fn for_date(dir: &Path, date: NaiveDate) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(ledger_file_name(date)),
            month: first_day_of_month(date),
        }
    }

    /// Sibling ledger in the same directory for the month containing `date`.
    pub fn for_month_of(&self, date: NaiveDate) -> Self {
        Self::for_date(&self.dir, date)
    }

    /// Ledger for the current wall-clock month.
    pub fn current(dir: &Path) -> Self {
        Self::for_date(dir, Local::now().date_naive())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `date` falls in this ledger's month.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date.year() == self.month.year() && date.month() == self.month.month()
    }

    /// Create this month's sheet, or append any day columns it is missing.
    /// Only writes when something changed.
    pub fn ensure_sheet(&self) -> Result<SheetStatus, LedgerError> {
        if !self.path.exists() {
            let sheet = Sheet::for_month(self.month);
            sheet.save(&self.path)?;
            let days = sheet.day_labels().len();
            tracing::info!(path = %self.path.display(), days, "created attendance ledger");
            return Ok(SheetStatus::Created { days });
        }

        let mut sheet = Sheet::load(&self.path)?;
        let added = sheet.add_missing_days(self.month);
        if added == 0 {
            tracing::info!(path = %self.path.display(), "attendance ledger exists, keeping data");
            return Ok(SheetStatus::Unchanged);
        }

        sheet.save(&self.path)?;
        tracing::info!(path = %self.path.display(), added, "added missing date columns");
        Ok(SheetStatus::Migrated { added })
    }

    pub fn load(&self) -> Result<Sheet, LedgerError> {
        if !self.path.exists() {
            return Err(LedgerError::SheetMissing(self.path.display().to_string()));
        }
        Sheet::load(&self.path)
    }

    /// Mark `name`/`roll_number` present at the current wall-clock time.
    pub fn mark_attendance(&self, name: &str, roll_number: &str) -> Result<MarkOutcome, LedgerError> {
        self.mark_attendance_at(name, roll_number, Local::now().naive_local())
    }

    /// Mark `name`/`roll_number` present at `now`, saving only on change.
    pub fn mark_attendance_at(
        &self,
        name: &str,
        roll_number: &str,
        now: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        let mut sheet = self.load()?;
        let outcome = sheet.mark(name, roll_number, now)?;
        if outcome.is_write() {
            sheet.save(&self.path)?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(h, min, s).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(date(2023, 2, 10)), date(2023, 2, 28));
        assert_eq!(last_day_of_month(date(2024, 2, 29)), date(2024, 2, 29));
        assert_eq!(last_day_of_month(date(2026, 4, 1)), date(2026, 4, 30));
        assert_eq!(last_day_of_month(date(2026, 12, 31)), date(2026, 12, 31));
        assert_eq!(last_day_of_month(date(1900, 2, 3)), date(1900, 2, 28));
        assert_eq!(last_day_of_month(date(2000, 2, 3)), date(2000, 2, 29));
    }

    #[test]
    fn test_day_columns_for_every_month() {
        for year in [2023, 2024] {
            for month in 1..=12 {
                let labels = month_day_labels(date(year, month, 15));
                let expected = last_day_of_month(date(year, month, 1)).day() as usize;
                assert_eq!(labels.len(), expected, "{year}-{month}");
                for (i, label) in labels.iter().enumerate() {
                    assert_eq!(label, &format!("{:02}-{:02}", i + 1, month));
                }
            }
        }
    }

    #[test]
    fn test_february_and_april_headers() {
        let feb = Sheet::for_month(date(2023, 2, 1));
        assert_eq!(feb.day_labels().len(), 28);
        assert_eq!(feb.day_labels().first().unwrap(), "01-02");
        assert_eq!(feb.day_labels().last().unwrap(), "28-02");

        let apr = Sheet::for_month(date(2026, 4, 9));
        assert_eq!(apr.day_labels().len(), 30);
        assert_eq!(apr.header()[..3], ["Name", "Roll Number", "01-04"]);
    }

    #[test]
    fn test_ledger_file_name() {
        assert_eq!(ledger_file_name(date(2026, 10, 18)), "Attendance_October_2026.csv");
    }

    #[test]
    fn test_mark_twice_keeps_first_time() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        let first = sheet.mark("Alice", "R01", at(2026, 6, 1, 9, 0, 0)).unwrap();
        assert_eq!(first, MarkOutcome::NewStudent { time: "09:00:00".into() });

        let again = sheet.mark("Alice", "R01", at(2026, 6, 1, 10, 0, 0)).unwrap();
        assert_eq!(again, MarkOutcome::AlreadyMarked { time: "09:00:00".into() });
        assert_eq!(sheet.cell("Alice", "R01", "01-06"), Some("09:00:00"));
        assert_eq!(sheet.rows().len(), 1);
    }

    #[test]
    fn test_mark_existing_student_new_day() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        sheet.mark("Alice", "R01", at(2026, 6, 1, 9, 0, 0)).unwrap();
        let next = sheet.mark("Alice", "R01", at(2026, 6, 2, 8, 30, 5)).unwrap();
        assert_eq!(next, MarkOutcome::Marked { time: "08:30:05".into() });
        assert_eq!(sheet.cell("Alice", "R01", "01-06"), Some("09:00:00"));
        assert_eq!(sheet.cell("Alice", "R01", "02-06"), Some("08:30:05"));
    }

    #[test]
    fn test_new_student_only_today_filled() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        sheet.mark("Bob", "R02", at(2026, 6, 5, 11, 12, 13)).unwrap();

        let row = &sheet.rows()[0];
        assert_eq!((row.name.as_str(), row.roll_number.as_str()), ("Bob", "R02"));
        for (i, label) in sheet.day_labels().iter().enumerate() {
            let expected = if label == "05-06" { "11:12:13" } else { "" };
            assert_eq!(row.day(i), expected, "column {label}");
        }
    }

    #[test]
    fn test_identity_match_is_exact() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        sheet.mark("Alice", "R01", at(2026, 6, 1, 9, 0, 0)).unwrap();
        let other = sheet.mark("Alice", "R1", at(2026, 6, 1, 9, 5, 0)).unwrap();
        assert!(matches!(other, MarkOutcome::NewStudent { .. }));
        assert_eq!(sheet.rows().len(), 2);
    }

    #[test]
    fn test_mark_missing_column_does_not_mutate() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        let before = sheet.clone();
        let err = sheet.mark("Alice", "R01", at(2026, 7, 1, 9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::DateColumnMissing(ref l) if l == "01-07"));
        assert!(err.is_schema_gap());
        assert_eq!(sheet, before);
    }

    #[test]
    fn test_mark_rejects_empty_identity() {
        let mut sheet = Sheet::for_month(date(2026, 6, 1));
        assert!(matches!(
            sheet.mark("", "R01", at(2026, 6, 1, 9, 0, 0)),
            Err(LedgerError::EmptyIdentity)
        ));
    }

    #[test]
    fn test_ensure_sheet_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2023, 2, 14));
        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Created { days: 28 });
        assert!(ledger.path().ends_with("Attendance_February_2023.csv"));

        let text = fs::read_to_string(ledger.path()).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.starts_with("Name,Roll Number,01-02,02-02,"));
        assert!(first_line.ends_with(",28-02"));

        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Unchanged);
    }

    #[test]
    fn test_ensure_sheet_appends_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 20));
        fs::write(
            ledger.path(),
            "Name,Roll Number,03-06,01-06,02-06\nAlice,R01,09:00:00,,08:15:00\nBob,R02,,07:59:59\n",
        )
        .unwrap();

        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Migrated { added: 27 });

        let sheet = ledger.load().unwrap();
        let labels = sheet.day_labels();
        assert_eq!(labels.len(), 30);
        // Existing columns keep their order; new ones follow in calendar order.
        assert_eq!(labels[..4], ["03-06", "01-06", "02-06", "04-06"]);
        assert_eq!(labels.last().unwrap(), "30-06");

        assert_eq!(sheet.cell("Alice", "R01", "03-06"), Some("09:00:00"));
        assert_eq!(sheet.cell("Alice", "R01", "01-06"), Some(""));
        assert_eq!(sheet.cell("Alice", "R01", "02-06"), Some("08:15:00"));
        assert_eq!(sheet.cell("Bob", "R02", "01-06"), Some("07:59:59"));
        assert_eq!(sheet.cell("Bob", "R02", "02-06"), Some(""));
        assert_eq!(sheet.cell("Bob", "R02", "04-06"), Some(""));

        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Unchanged);
    }

    #[test]
    fn test_ensure_sheet_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 20));
        fs::write(ledger.path(), "Student,Id\n").unwrap();
        assert!(matches!(ledger.ensure_sheet(), Err(LedgerError::Malformed { .. })));
    }

    #[test]
    fn test_mark_attendance_persists() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 1));
        ledger.ensure_sheet().unwrap();

        let outcome = ledger.mark_attendance_at("Alice", "R01", at(2026, 6, 1, 9, 0, 0)).unwrap();
        assert!(matches!(outcome, MarkOutcome::NewStudent { .. }));

        let outcome = ledger.mark_attendance_at("Alice", "R01", at(2026, 6, 1, 10, 0, 0)).unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyMarked { time: "09:00:00".into() });

        ledger.mark_attendance_at("Bob", "R02", at(2026, 6, 5, 12, 0, 0)).unwrap();

        let text = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let alice: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(alice.len(), 32);
        assert_eq!(alice[..3], ["Alice", "R01", "09:00:00"]);
        assert!(alice[3..].iter().all(|c| c.is_empty()));
        let bob: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(bob[..7], ["Bob", "R02", "", "", "", "", "12:00:00"]);
        assert!(!dir.path().join("Attendance_June_2026.csv.tmp").exists());
    }

    #[test]
    fn test_ensure_sheet_keeps_cells_past_header() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 20));
        fs::write(ledger.path(), "Name,Roll Number,01-06\nAlice,R01,09:00:00,note\n").unwrap();

        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Migrated { added: 29 });

        let text = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let header: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(header[..5], ["Name", "Roll Number", "01-06", "", "02-06"]);
        assert_eq!(header.len(), 2 + 1 + 1 + 29);
        let alice: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(alice[..5], ["Alice", "R01", "09:00:00", "note", ""]);

        // The blank-titled column is never treated as a day.
        ledger.mark_attendance_at("Alice", "R01", at(2026, 6, 2, 8, 0, 0)).unwrap();
        let sheet = ledger.load().unwrap();
        assert_eq!(sheet.rows()[0].day(1), "note");
        assert_eq!(sheet.cell("Alice", "R01", "02-06"), Some("08:00:00"));
        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Unchanged);
    }

    #[test]
    fn test_unchanged_sheet_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 20));
        ledger.ensure_sheet().unwrap();
        ledger.mark_attendance_at("Alice", "R01", at(2026, 6, 3, 9, 0, 0)).unwrap();

        let bytes = fs::read(ledger.path()).unwrap();
        let modified = fs::metadata(ledger.path()).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(ledger.ensure_sheet().unwrap(), SheetStatus::Unchanged);
        assert_eq!(fs::read(ledger.path()).unwrap(), bytes);
        assert_eq!(fs::metadata(ledger.path()).unwrap().modified().unwrap(), modified);
        assert!(!dir.path().join("Attendance_June_2026.csv.tmp").exists());
    }

    #[test]
    fn test_mark_attendance_uses_wall_clock() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::current(dir.path());
        ledger.ensure_sheet().unwrap();
        assert!(ledger.covers(Local::now().date_naive()));

        let first = ledger.mark_attendance("Alice", "R01").unwrap();
        let MarkOutcome::NewStudent { time } = first else {
            panic!("expected a new row, got {first:?}");
        };
        assert_eq!(time.len(), 8);

        let sheet = ledger.load().unwrap();
        assert_eq!(sheet.rows().len(), 1);
        assert_eq!(sheet.rows()[0].name, "Alice");
    }

    #[test]
    fn test_for_month_of_shares_directory() {
        let dir = tempfile::tempdir().unwrap();
        let june = Ledger::for_date(dir.path(), date(2026, 6, 30));
        let july = june.for_month_of(date(2026, 7, 1));
        assert_eq!(july.path(), dir.path().join("Attendance_July_2026.csv"));
        assert!(july.covers(date(2026, 7, 31)));
        assert!(!july.covers(date(2026, 6, 30)));
    }

    #[test]
    fn test_mark_attendance_without_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 1));
        let err = ledger.mark_attendance_at("Alice", "R01", at(2026, 6, 1, 9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::SheetMissing(_)));
        assert!(err.is_schema_gap());
    }

    #[test]
    fn test_mark_after_month_rollover_reports_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::for_date(dir.path(), date(2026, 6, 30));
        ledger.ensure_sheet().unwrap();
        let before = fs::read_to_string(ledger.path()).unwrap();

        let err = ledger.mark_attendance_at("Alice", "R01", at(2026, 7, 1, 0, 0, 5)).unwrap_err();
        assert!(matches!(err, LedgerError::DateColumnMissing(_)));
        assert_eq!(fs::read_to_string(ledger.path()).unwrap(), before);
    }

    #[test]
    fn test_covers_month() {
        let ledger = Ledger::for_date(Path::new("."), date(2026, 6, 15));
        assert!(ledger.covers(date(2026, 6, 1)));
        assert!(!ledger.covers(date(2026, 7, 1)));
        assert!(!ledger.covers(date(2025, 6, 1)));
    }
}

//! Attendance table: one row per subject, one `Present`/`Absent` column per date.
//! Columns whose header is not a date are kept as they were read.
//!
//! The file is always rewritten whole through [`persist::write_atomic`], so a
//! concurrent reader sees either the previous table or the new one.

use crate::persist;
use crate::types::{parse_subject_id, SubjectId};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ID_COLUMN: &str = "StudentID";
pub const NAME_COLUMN: &str = "FullName";

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance file I/O failed for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed attendance table: {0}")]
    Csv(#[from] csv::Error),
    #[error("attendance table has no StudentID column")]
    MissingIdColumn,
    #[error("invalid StudentID {value:?} on line {line}")]
    InvalidId { line: u64, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mark {
    Present,
    #[default]
    Absent,
}

impl Mark {
    pub fn as_str(self) -> &'static str {
        match self {
            Mark::Present => "Present",
            Mark::Absent => "Absent",
        }
    }

    /// Anything other than an exact `Present` reads as absent.
    pub fn parse(cell: &str) -> Self {
        if cell.trim() == "Present" {
            Mark::Present
        } else {
            Mark::Absent
        }
    }
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub subject_id: SubjectId,
    pub name: String,
    /// One mark per entry of [`AttendanceTable::dates`].
    pub marks: Vec<Mark>,
    /// Cells of the columns that are not dates, as read.
    pub extra: Vec<String>,
}

/// Where a column after `StudentID`/`FullName` keeps its cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Date(usize),
    Extra(usize),
}

/// Only `YYYY-MM-DD` headers are attendance dates; any other column is
/// carried through untouched.
pub fn is_date_header(header: &str) -> bool {
    header.len() == 10 && chrono::NaiveDate::parse_from_str(header, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceTable {
    dates: Vec<String>,
    extra: Vec<String>,
    layout: Vec<Column>,
    rows: Vec<AttendanceRow>,
}

impl AttendanceTable {
    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    /// Headers of the non-date columns, in file order.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra
    }

    pub fn rows(&self) -> &[AttendanceRow] {
        &self.rows
    }

    pub fn mark(&self, subject_id: SubjectId, date: &str) -> Option<Mark> {
        let col = self.dates.iter().position(|d| d == date)?;
        self.rows
            .iter()
            .find(|r| r.subject_id == subject_id)
            .map(|r| r.marks[col])
    }

    /// Parse a table. A missing `FullName` column is tolerated and rows
    /// shorter than the header read as absent for the trailing dates.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AttendanceError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let id_col = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .ok_or(AttendanceError::MissingIdColumn)?;
        let name_col = headers.iter().position(|h| h == NAME_COLUMN);

        let mut table = Self::default();
        let mut sources = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            if i == id_col || Some(i) == name_col {
                continue;
            }
            let column = if is_date_header(header) {
                table.dates.push(header.to_string());
                Column::Date(table.dates.len() - 1)
            } else {
                table.extra.push(header.to_string());
                Column::Extra(table.extra.len() - 1)
            };
            table.layout.push(column);
            sources.push(i);
        }

        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let raw_id = record.get(id_col).unwrap_or_default();
            if raw_id.is_empty() && record.iter().all(str::is_empty) {
                continue;
            }
            let subject_id = parse_subject_id(raw_id).ok_or_else(|| AttendanceError::InvalidId {
                line,
                value: raw_id.to_string(),
            })?;
            let name = name_col
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string();

            let mut row = AttendanceRow {
                subject_id,
                name,
                marks: vec![Mark::Absent; table.dates.len()],
                extra: vec![String::new(); table.extra.len()],
            };
            for (&column, &i) in table.layout.iter().zip(&sources) {
                let cell = record.get(i).unwrap_or_default();
                match column {
                    Column::Date(d) => row.marks[d] = Mark::parse(cell),
                    Column::Extra(e) => row.extra[e] = cell.to_string(),
                }
            }
            table.rows.push(row);
        }

        Ok(table)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec![ID_COLUMN, NAME_COLUMN];
        header.extend(self.layout.iter().map(|&column| match column {
            Column::Date(d) => self.dates[d].as_str(),
            Column::Extra(e) => self.extra[e].as_str(),
        }));
        wtr.write_record(&header)?;

        for row in &self.rows {
            let id = row.subject_id.to_string();
            let mut record = vec![id.as_str(), row.name.as_str()];
            record.extend(self.layout.iter().map(|&column| match column {
                Column::Date(d) => row.marks[d].as_str(),
                Column::Extra(e) => row.extra[e].as_str(),
            }));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Mark `subject_id` present on `date`, creating the date column and the
    /// subject row as needed. Every row carrying the id is updated.
    pub fn mark_present(&mut self, subject_id: SubjectId, name: &str, date: &str) {
        let col = match self.dates.iter().position(|d| d == date) {
            Some(col) => col,
            None => {
                self.dates.push(date.to_string());
                self.layout.push(Column::Date(self.dates.len() - 1));
                for row in &mut self.rows {
                    row.marks.push(Mark::Absent);
                }
                self.dates.len() - 1
            }
        };

        if !self.rows.iter().any(|r| r.subject_id == subject_id) {
            self.rows.push(AttendanceRow {
                subject_id,
                name: String::new(),
                marks: vec![Mark::Absent; self.dates.len()],
                extra: vec![String::new(); self.extra.len()],
            });
        }

        for row in self.rows.iter_mut().filter(|r| r.subject_id == subject_id) {
            row.name = name.to_string();
            row.marks[col] = Mark::Present;
        }
    }
}

/// The attendance file on disk.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    path: PathBuf,
}

impl AttendanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current table; a missing file is an empty table.
    pub fn load(&self) -> Result<AttendanceTable, AttendanceError> {
        match std::fs::File::open(&self.path) {
            Ok(file) => AttendanceTable::from_reader(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AttendanceTable::default()),
            Err(source) => Err(AttendanceError::Io {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }

    /// Load, mark, and rewrite the whole file.
    pub fn record_present(
        &self,
        subject_id: SubjectId,
        name: &str,
        date: &str,
    ) -> Result<(), AttendanceError> {
        let mut table = self.load()?;
        table.mark_present(subject_id, name, date);
        persist::write_atomic(&self.path, |w| {
            table.to_writer(w).map_err(std::io::Error::from)
        })
        .map_err(|source| AttendanceError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        tracing::info!(subject_id, date, path = %self.path.display(), "attendance recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(table: &AttendanceTable) -> String {
        let mut out = Vec::new();
        table.to_writer(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_mark_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttendanceStore::new(dir.path().join("Attendance/attendance.csv"));
        store.record_present(7, "Ada Lovelace", "2024-01-10").unwrap();
        store.record_present(7, "Ada Lovelace", "2024-01-10").unwrap();

        let table = store.load().unwrap();
        assert_eq!(table.rows().len(), 1);
        assert_eq!(table.dates(), ["2024-01-10"]);
        assert_eq!(table.mark(7, "2024-01-10"), Some(Mark::Present));
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "StudentID,FullName,2024-01-10\n7,Ada Lovelace,Present\n"
        );
    }

    #[test]
    fn test_new_date_defaults_absent() {
        let csv = "StudentID,FullName,2024-01-09\n7,Ada,Present\n9,Alan,Present\n";
        let mut table = AttendanceTable::from_reader(csv.as_bytes()).unwrap();
        table.mark_present(7, "Ada", "2024-01-10");
        assert_eq!(
            render(&table),
            "StudentID,FullName,2024-01-09,2024-01-10\n7,Ada,Present,Present\n9,Alan,Present,Absent\n"
        );
    }

    #[test]
    fn test_new_subject_row() {
        let csv = "StudentID,FullName,2024-01-09\n9,Alan,Present\n";
        let mut table = AttendanceTable::from_reader(csv.as_bytes()).unwrap();
        table.mark_present(7, "Ada", "2024-01-09");
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.mark(7, "2024-01-09"), Some(Mark::Present));
    }

    #[test]
    fn test_short_rows_and_missing_name_column() {
        let csv = "StudentID,2024-01-08,2024-01-09\n7,Present\n9.0,,Present\n";
        let mut table = AttendanceTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.mark(7, "2024-01-09"), Some(Mark::Absent));
        assert_eq!(table.mark(9, "2024-01-09"), Some(Mark::Present));

        table.mark_present(9, "Alan", "2024-01-09");
        assert_eq!(
            render(&table),
            "StudentID,FullName,2024-01-08,2024-01-09\n7,,Present,Absent\n9,Alan,Absent,Present\n"
        );
    }

    #[test]
    fn test_foreign_columns_survive_marking() {
        let csv = "StudentID,FullName,Email,2024-01-09,Notes\n\
                   7,Ada,ada@example.org,Present,front row\n\
                   9,Alan,alan@example.org,Absent,\n";
        let mut table = AttendanceTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.dates(), ["2024-01-09"]);
        assert_eq!(table.extra_columns(), ["Email", "Notes"]);

        table.mark_present(9, "Alan", "2024-01-10");
        table.mark_present(3, "Grace", "2024-01-10");
        assert_eq!(
            render(&table),
            "StudentID,FullName,Email,2024-01-09,Notes,2024-01-10\n\
             7,Ada,ada@example.org,Present,front row,Absent\n\
             9,Alan,alan@example.org,Absent,,Present\n\
             3,Grace,,Absent,,Present\n"
        );
    }

    #[test]
    fn test_date_header_shape() {
        assert!(is_date_header("2024-01-09"));
        assert!(!is_date_header("2024-1-9"));
        assert!(!is_date_header("2024-13-01"));
        assert!(!is_date_header("Email"));
    }

    #[test]
    fn test_names_with_commas_are_quoted() {
        let mut table = AttendanceTable::default();
        table.mark_present(3, "Hopper, Grace", "2024-02-01");
        let text = render(&table);
        assert_eq!(text, "StudentID,FullName,2024-02-01\n3,\"Hopper, Grace\",Present\n");
        let back = AttendanceTable::from_reader(text.as_bytes()).unwrap();
        assert_eq!(back.rows()[0].name, "Hopper, Grace");
    }

    #[test]
    fn test_missing_id_column() {
        let err = AttendanceTable::from_reader("Name,2024-01-01\nAda,Present\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AttendanceError::MissingIdColumn));
    }

    #[test]
    fn test_invalid_id() {
        let err = AttendanceTable::from_reader("StudentID,FullName\nabc,Ada\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidId { .. }));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = AttendanceStore::new("/nonexistent/rollcall/attendance.csv");
        assert_eq!(store.load().unwrap(), AttendanceTable::default());
    }
}

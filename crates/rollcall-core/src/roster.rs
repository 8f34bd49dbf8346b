//! Read-only view of the student roster (`students.csv`).

use crate::types::{parse_subject_id, Subject, SubjectId};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster not found at {0}")]
    NotFound(String),
    #[error("roster I/O failed for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid StudentID {0:?} in roster")]
    InvalidId(String),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "StudentID")]
    student_id: String,
    #[serde(rename = "FullName", default)]
    full_name: String,
    #[serde(rename = "Status", default)]
    status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub subject_id: SubjectId,
    pub full_name: String,
    pub status: Option<String>,
}

impl RosterEntry {
    /// A missing or blank status counts as active.
    pub fn is_active(&self) -> bool {
        !self
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("inactive"))
    }

    pub fn subject(&self) -> Subject {
        Subject {
            subject_id: self.subject_id,
            display_name: self.full_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let file = std::fs::File::open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RosterError::NotFound(path.display().to_string())
            } else {
                RosterError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RosterError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut entries = Vec::new();
        for raw in rdr.deserialize::<RawEntry>() {
            let raw = raw?;
            let subject_id =
                parse_subject_id(&raw.student_id).ok_or(RosterError::InvalidId(raw.student_id))?;
            entries.push(RosterEntry {
                subject_id,
                full_name: raw.full_name,
                status: raw.status.filter(|s| !s.is_empty()),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// First entry with `subject_id`.
    pub fn get(&self, subject_id: SubjectId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.subject_id == subject_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter().filter(|e| e.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDENTS: &str = "\
StudentID,FullName,Program,Status
7,Ada Lovelace,Maths,Active
9,Alan Turing,CS,INACTIVE
11,Grace Hopper,CS,
";

    #[test]
    fn test_load_and_lookup() {
        let roster = Roster::from_reader(STUDENTS.as_bytes()).unwrap();
        assert_eq!(roster.entries().len(), 3);
        assert_eq!(roster.get(7).unwrap().full_name, "Ada Lovelace");
        assert!(roster.get(8).is_none());
    }

    #[test]
    fn test_inactive_filtered() {
        let roster = Roster::from_reader(STUDENTS.as_bytes()).unwrap();
        let ids: Vec<_> = roster.active().map(|e| e.subject_id).collect();
        assert_eq!(ids, vec![7, 11]);
        assert!(!roster.get(9).unwrap().is_active());
    }

    #[test]
    fn test_missing_status_column() {
        let roster = Roster::from_reader("StudentID,FullName\n3.0,Edsger\n".as_bytes()).unwrap();
        let entry = roster.get(3).unwrap();
        assert!(entry.is_active());
        assert_eq!(entry.subject().display_name, "Edsger");
    }

    #[test]
    fn test_invalid_id() {
        let err = Roster::from_reader("StudentID,FullName\nx,Ada\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RosterError::InvalidId(id) if id == "x"));
    }

    #[test]
    fn test_missing_file() {
        let err = Roster::load(Path::new("/nonexistent/students.csv")).unwrap_err();
        assert!(matches!(err, RosterError::NotFound(_)));
    }
}

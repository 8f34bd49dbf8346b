//! Enrollment sample naming and on-disk storage.
//!
//! Samples live flat in one directory as `{short_name}_{subject_id}_{sequence}.jpg`.
//! The file name is the only place the subject id is recorded, so every
//! read and write of that convention goes through [`SampleName`].

use crate::types::SubjectId;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SAMPLE_EXTENSION: &str = "jpg";

const FALLBACK_SHORT_NAME: &str = "subject";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("not a sample file name: {0}")]
    InvalidName(String),
    #[error("dataset I/O failed for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write sample {path}: {source}")]
    Encode {
        path: String,
        source: image::ImageError,
    },
}

/// Parsed identity of one enrollment sample file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleName {
    pub short_name: String,
    pub subject_id: SubjectId,
    pub sequence: u32,
}

impl SampleName {
    pub fn new(display_name: &str, subject_id: SubjectId, sequence: u32) -> Self {
        Self {
            short_name: short_name(display_name),
            subject_id,
            sequence,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.{SAMPLE_EXTENSION}",
            self.short_name, self.subject_id, self.sequence
        )
    }

    /// Parse a file name (with or without directories).
    ///
    /// Fields are taken from the right so that the id and sequence are found
    /// even when the short name was written by an older tool with underscores.
    pub fn parse(file_name: &str) -> Result<Self, DatasetError> {
        let invalid = || DatasetError::InvalidName(file_name.to_string());
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(invalid)?;

        let mut parts = stem.rsplitn(3, '_');
        let sequence = parts.next().and_then(|s| s.parse::<u32>().ok()).ok_or_else(invalid)?;
        let subject_id = parts.next().and_then(|s| s.parse::<SubjectId>().ok()).ok_or_else(invalid)?;
        let short_name = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            short_name: short_name.to_string(),
            subject_id,
            sequence,
        })
    }
}

/// First word of a display name, made safe for the naming convention.
pub fn short_name(display_name: &str) -> String {
    let first = display_name.split_whitespace().next().unwrap_or("");
    let cleaned: String = first
        .chars()
        .map(|c| if matches!(c, '_' | '/' | '\\' | '.') { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        FALLBACK_SHORT_NAME.to_string()
    } else {
        cleaned
    }
}

/// Directory of enrollment samples.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &SampleName) -> PathBuf {
        self.root.join(name.file_name())
    }

    /// Write one grayscale face crop, replacing a same-named sample.
    pub fn write(&self, name: &SampleName, face: &GrayImage) -> Result<PathBuf, DatasetError> {
        std::fs::create_dir_all(&self.root).map_err(|source| DatasetError::Io {
            path: self.root.display().to_string(),
            source,
        })?;
        let path = self.path_for(name);
        face.save(&path).map_err(|source| DatasetError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), subject_id = name.subject_id, sequence = name.sequence, "sample written");
        Ok(path)
    }

    /// Every regular file in the dataset directory, sorted by path.
    /// A missing directory is an empty dataset.
    pub fn list(&self) -> Result<Vec<PathBuf>, DatasetError> {
        let io_err = |source| DatasetError::Io {
            path: self.root.display().to_string(),
            source,
        };
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_file_name_format() {
        let name = SampleName::new("Ada Lovelace", 7, 3);
        assert_eq!(name.file_name(), "Ada_7_3.jpg");
    }

    #[test]
    fn test_parse_valid() {
        let parsed = SampleName::parse("dataset/Ada_7_3.jpg").unwrap();
        assert_eq!(parsed, SampleName { short_name: "Ada".into(), subject_id: 7, sequence: 3 });
    }

    #[test]
    fn test_parse_underscore_in_short_name() {
        let parsed = SampleName::parse("mary_jane_12_40.jpg").unwrap();
        assert_eq!(parsed.short_name, "mary_jane");
        assert_eq!(parsed.subject_id, 12);
        assert_eq!(parsed.sequence, 40);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["notes.txt", "Ada_x_3.jpg", "Ada_7_.jpg", "_7_3.jpg", "7_3.jpg", ""] {
            assert!(SampleName::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_short_name_sanitized() {
        assert_eq!(short_name("Jean_Luc Picard"), "Jean-Luc");
        assert_eq!(short_name("  Grace  Hopper "), "Grace");
        assert_eq!(short_name("../etc"), "---etc");
        assert_eq!(short_name("   "), "subject");
    }

    #[test]
    fn test_write_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("dataset"));
        let face = GrayImage::from_pixel(8, 8, Luma([100]));
        for seq in 1..=3 {
            store.write(&SampleName::new("Ada", 7, seq), &face).unwrap();
        }
        store.write(&SampleName::new("Alan", 9, 1), &face).unwrap();

        let files = store.list().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Ada_7_1.jpg", "Ada_7_2.jpg", "Ada_7_3.jpg", "Alan_9_1.jpg"]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let store = SampleStore::new("/nonexistent/rollcall/dataset");
        assert!(store.list().unwrap().is_empty());
    }
}

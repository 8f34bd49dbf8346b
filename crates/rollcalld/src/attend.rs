//! Recognition and attendance worker.

use crate::engine::StatusTx;
use rollcall_core::{
    imageops, AttendanceStore, Detector, FrameVerdict, LivenessMatcher, RecognitionParams,
    RecognitionState, Recognizer, Roster, SubjectId,
};
use rollcall_hw::FrameSource;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Recorded when the roster cannot name a matched subject.
pub const FALLBACK_NAME: &str = "Known User";

pub(crate) struct RecognitionJob {
    pub subject_id: SubjectId,
    pub params: RecognitionParams,
    pub source: Box<dyn FrameSource>,
    pub faces: Arc<dyn Detector>,
    pub eyes: Arc<dyn Detector>,
    pub recognizer: Arc<dyn Recognizer>,
    pub attendance: AttendanceStore,
    pub roster: PathBuf,
    pub cancel: CancellationToken,
    pub finished: Arc<AtomicBool>,
    pub status: StatusTx,
}

enum Exit {
    Matched,
    Ended(RecognitionState),
}

pub(crate) fn run(job: RecognitionJob) {
    let RecognitionJob {
        subject_id,
        params,
        mut source,
        faces,
        eyes,
        recognizer,
        attendance,
        roster,
        cancel,
        finished,
        status,
    } = job;
    let mut matcher = LivenessMatcher::new(subject_id, params);
    let mut published_blinks = 0;

    let exit = loop {
        if cancel.is_cancelled() {
            break Exit::Ended(RecognitionState::Stopped { subject_id });
        }

        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                break Exit::Ended(RecognitionState::Error {
                    message: "camera stopped delivering frames".into(),
                })
            }
            Err(e) => break Exit::Ended(RecognitionState::Error { message: e.to_string() }),
        };
        let Some(gray) = imageops::gray_from_raw(frame.data, frame.width, frame.height) else {
            tracing::warn!(sequence = frame.sequence, "dropping malformed frame");
            continue;
        };

        match matcher.process_frame(&gray, &*faces, &*eyes, &*recognizer) {
            FrameVerdict::Matched { blinks } => {
                tracing::info!(subject_id, blinks, "liveness confirmed");
                break Exit::Matched;
            }
            FrameVerdict::Matching { blinks } if blinks != published_blinks => {
                published_blinks = blinks;
                status.send_modify(|s| s.recognition = RecognitionState::Running { subject_id, blinks });
            }
            FrameVerdict::NoMatch if published_blinks != 0 => {
                published_blinks = 0;
                status.send_modify(|s| {
                    s.recognition = RecognitionState::Running {
                        subject_id,
                        blinks: 0,
                    }
                });
            }
            _ => {}
        }
    };

    drop(source);
    drop(matcher);

    let outcome = match exit {
        Exit::Matched => record(subject_id, &roster, &attendance),
        Exit::Ended(state) => state,
    };
    match &outcome {
        RecognitionState::Error { message } => {
            tracing::error!(subject_id, error = %message, "recognition failed")
        }
        state => tracing::info!(subject_id, ?state, "recognition ended"),
    }
    finished.store(true, Ordering::SeqCst);
    status.send_modify(|s| s.recognition = outcome);
}

fn record(subject_id: SubjectId, roster: &Path, attendance: &AttendanceStore) -> RecognitionState {
    let name = display_name(roster, subject_id);
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    match attendance.record_present(subject_id, &name, &date) {
        Ok(()) => RecognitionState::Matched {
            subject_id,
            name,
            date,
        },
        Err(e) => RecognitionState::Error {
            message: format!("Error writing attendance: {e}"),
        },
    }
}

fn display_name(roster: &Path, subject_id: SubjectId) -> String {
    Roster::load(roster)
        .ok()
        .and_then(|r| r.get(subject_id).map(|e| e.full_name.clone()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name(Path::new("/nonexistent/students.csv"), 7), "Known User");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        std::fs::write(&path, "StudentID,FullName\n7,Ada Lovelace\n8,\n").unwrap();
        assert_eq!(display_name(&path, 7), "Ada Lovelace");
        assert_eq!(display_name(&path, 8), "Known User");
        assert_eq!(display_name(&path, 9), "Known User");
    }

    #[test]
    fn test_attendance_write_failure_is_error_state() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let target = dir.path().join("attendance.csv");
        std::fs::create_dir_all(target.join("occupied")).unwrap();
        let state = record(7, Path::new("/nonexistent/students.csv"), &AttendanceStore::new(&target));
        assert!(matches!(state, RecognitionState::Error { message } if message.starts_with("Error writing attendance")));
    }
}

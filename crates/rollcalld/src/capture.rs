//! Enrollment capture worker.

use crate::engine::{CaptureState, StatusTx};
use rollcall_core::{imageops, DetectParams, Detector, SampleName, SampleStore, Subject};
use rollcall_hw::FrameSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct CaptureJob {
    pub subject: Subject,
    pub target: u32,
    pub source: Box<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub params: DetectParams,
    pub store: SampleStore,
    pub cancel: CancellationToken,
    pub finished: Arc<AtomicBool>,
    pub status: StatusTx,
}

/// Save face crops until `target` samples exist or the session is cancelled.
///
/// Every detection in a frame is saved while the count is below target, so a
/// single frame may contribute several samples.
pub(crate) fn run(job: CaptureJob) {
    let CaptureJob {
        subject,
        target,
        mut source,
        detector,
        params,
        store,
        cancel,
        finished,
        status,
    } = job;
    let subject_id = subject.subject_id;
    let mut captured = 0u32;

    let outcome = loop {
        if cancel.is_cancelled() {
            break CaptureState::Stopped {
                subject_id,
                captured,
            };
        }

        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                break CaptureState::Error {
                    message: "camera stopped delivering frames".into(),
                }
            }
            Err(e) => break CaptureState::Error { message: e.to_string() },
        };
        let Some(gray) = imageops::gray_from_raw(frame.data, frame.width, frame.height) else {
            tracing::warn!(sequence = frame.sequence, "dropping malformed frame");
            continue;
        };

        let mut failure = None;
        for region in detector.detect(&gray, params) {
            if captured >= target {
                break;
            }
            let Some(face) = imageops::crop(&gray, region) else {
                continue;
            };
            let name = SampleName::new(&subject.display_name, subject_id, captured + 1);
            match store.write(&name, &face) {
                Ok(_) => {
                    captured += 1;
                    status.send_modify(|s| {
                        s.capture = CaptureState::Running {
                            subject_id,
                            captured,
                            target,
                        }
                    });
                    tracing::debug!(subject_id, captured, target, "sample captured");
                }
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(message) = failure {
            break CaptureState::Error { message };
        }
        if captured >= target {
            break CaptureState::Completed {
                subject_id,
                captured,
            };
        }
    };

    drop(source);
    match &outcome {
        CaptureState::Error { message } => {
            tracing::error!(subject_id, captured, error = %message, "capture failed")
        }
        _ => tracing::info!(subject_id, captured, target, "capture session ended"),
    }
    finished.store(true, Ordering::SeqCst);
    status.send_modify(|s| s.capture = outcome);
}

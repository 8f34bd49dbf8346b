//! Per-frame target confirmation: face match, then blink-gated liveness.

use crate::imageops;
use crate::liveness::BlinkGate;
use crate::types::{DetectParams, Detector, Recognizer, SubjectId};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Lifecycle of one recognition session as published to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecognitionState {
    #[default]
    Idle,
    Running {
        subject_id: SubjectId,
        blinks: u32,
    },
    Matched {
        subject_id: SubjectId,
        name: String,
        date: String,
    },
    Stopped {
        subject_id: SubjectId,
    },
    Error {
        message: String,
    },
}

impl RecognitionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionParams {
    /// Distances at or above this never match.
    pub confidence_threshold: f64,
    /// Blink count that must be exceeded before a match is accepted.
    pub required_blinks: u32,
    pub face: DetectParams,
    pub eyes: DetectParams,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 50.0,
            required_blinks: 10,
            face: DetectParams::new(1.2, 5),
            eyes: DetectParams::new(1.1, 5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// No detection in the frame matched the target; the blink count was reset.
    NoMatch,
    /// At least one detection matched; liveness not yet satisfied.
    Matching { blinks: u32 },
    /// Liveness satisfied on a matching detection.
    Matched { blinks: u32 },
}

/// Confirms that `target` is in front of the camera.
///
/// Owns the per-session blink counter. Dropping the matcher discards it.
pub struct LivenessMatcher {
    target: SubjectId,
    params: RecognitionParams,
    gate: BlinkGate,
}

impl LivenessMatcher {
    pub fn new(target: SubjectId, params: RecognitionParams) -> Self {
        Self {
            target,
            params,
            gate: BlinkGate::new(params.required_blinks),
        }
    }

    pub fn blinks(&self) -> u32 {
        self.gate.count()
    }

    pub fn process_frame(
        &mut self,
        frame: &GrayImage,
        faces: &dyn Detector,
        eyes: &dyn Detector,
        recognizer: &dyn Recognizer,
    ) -> FrameVerdict {
        let mut matched_any = false;

        for region in faces.detect(frame, self.params.face) {
            let Some(face) = imageops::crop(frame, region) else {
                continue;
            };
            let Some(prediction) = recognizer.predict(&face) else {
                continue;
            };
            if prediction.subject_id != self.target
                || prediction.distance >= self.params.confidence_threshold
            {
                tracing::trace!(
                    predicted = prediction.subject_id,
                    distance = prediction.distance,
                    "detection rejected"
                );
                continue;
            }

            matched_any = true;
            let eyes_found = eyes.detect(&face, self.params.eyes).len();
            if self.gate.observe(eyes_found) {
                return FrameVerdict::Matched {
                    blinks: self.gate.count(),
                };
            }
        }

        if matched_any {
            FrameVerdict::Matching {
                blinks: self.gate.count(),
            }
        } else {
            if self.gate.count() > 0 {
                tracing::debug!(blinks = self.gate.count(), "match lost, blink count reset");
            }
            self.gate.reset();
            FrameVerdict::NoMatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Prediction, Rect};
    use image::Luma;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One whole-frame face when the top-left pixel is bright, none otherwise.
    struct BrightFace;
    impl Detector for BrightFace {
        fn detect(&self, image: &GrayImage, _: DetectParams) -> Vec<Rect> {
            if image.get_pixel(0, 0)[0] > 128 {
                vec![Rect::new(0, 0, image.width() as i32, image.height() as i32)]
            } else {
                Vec::new()
            }
        }
    }

    struct FixedEyes(AtomicUsize);
    impl Detector for FixedEyes {
        fn detect(&self, _: &GrayImage, _: DetectParams) -> Vec<Rect> {
            vec![Rect::new(0, 0, 1, 1); self.0.load(Ordering::Relaxed)]
        }
    }

    struct Fixed(Prediction);
    impl Recognizer for Fixed {
        fn predict(&self, _: &GrayImage) -> Option<Prediction> {
            Some(self.0)
        }
    }

    fn bright() -> GrayImage {
        GrayImage::from_pixel(16, 16, Luma([200]))
    }

    fn dark() -> GrayImage {
        GrayImage::from_pixel(16, 16, Luma([10]))
    }

    fn matcher() -> LivenessMatcher {
        LivenessMatcher::new(7, RecognitionParams::default())
    }

    #[test]
    fn test_above_threshold_never_matches() {
        let mut m = matcher();
        let rec = Fixed(Prediction { subject_id: 7, distance: 50.0 });
        let eyes = FixedEyes(AtomicUsize::new(0));
        for _ in 0..100 {
            assert_eq!(m.process_frame(&bright(), &BrightFace, &eyes, &rec), FrameVerdict::NoMatch);
        }
    }

    #[test]
    fn test_matches_on_eleventh_qualifying_frame() {
        let mut m = matcher();
        let rec = Fixed(Prediction { subject_id: 7, distance: 20.0 });
        let eyes = FixedEyes(AtomicUsize::new(1));
        for i in 1..=10 {
            assert_eq!(
                m.process_frame(&bright(), &BrightFace, &eyes, &rec),
                FrameVerdict::Matching { blinks: i }
            );
        }
        assert_eq!(
            m.process_frame(&bright(), &BrightFace, &eyes, &rec),
            FrameVerdict::Matched { blinks: 11 }
        );
    }

    #[test]
    fn test_non_matching_frame_resets() {
        let mut m = matcher();
        let rec = Fixed(Prediction { subject_id: 7, distance: 20.0 });
        let eyes = FixedEyes(AtomicUsize::new(0));
        for _ in 0..10 {
            m.process_frame(&bright(), &BrightFace, &eyes, &rec);
        }
        assert_eq!(m.blinks(), 10);
        assert_eq!(m.process_frame(&dark(), &BrightFace, &eyes, &rec), FrameVerdict::NoMatch);
        assert_eq!(m.blinks(), 0);
        assert_eq!(
            m.process_frame(&bright(), &BrightFace, &eyes, &rec),
            FrameVerdict::Matching { blinks: 1 }
        );
    }

    #[test]
    fn test_open_eyes_keep_matching_without_blinks() {
        let mut m = matcher();
        let rec = Fixed(Prediction { subject_id: 7, distance: 20.0 });
        let eyes = FixedEyes(AtomicUsize::new(2));
        for _ in 0..30 {
            assert_eq!(
                m.process_frame(&bright(), &BrightFace, &eyes, &rec),
                FrameVerdict::Matching { blinks: 0 }
            );
        }
        eyes.0.store(0, Ordering::Relaxed);
        assert_eq!(
            m.process_frame(&bright(), &BrightFace, &eyes, &rec),
            FrameVerdict::Matching { blinks: 1 }
        );
    }

    #[test]
    fn test_other_subject_never_matches() {
        let mut m = matcher();
        let rec = Fixed(Prediction { subject_id: 8, distance: 1.0 });
        let eyes = FixedEyes(AtomicUsize::new(0));
        for _ in 0..50 {
            assert_eq!(m.process_frame(&bright(), &BrightFace, &eyes, &rec), FrameVerdict::NoMatch);
        }
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&RecognitionState::Running { subject_id: 7, blinks: 3 }).unwrap();
        assert_eq!(json, r#"{"state":"running","subject_id":7,"blinks":3}"#);
    }
}

//! rollcall-core: Face detection, recognition and attendance bookkeeping.
//!
//! Faces and eyes are found with boosted Haar cascades, identified with Local
//! Binary Pattern Histograms, and confirmed with a blink count before the
//! attendance table is updated. Everything here is synchronous and
//! camera-agnostic; frames arrive as 8-bit grayscale images.

pub mod attendance;
pub mod cascade;
pub mod dataset;
pub mod imageops;
pub mod lbph;
pub mod liveness;
pub mod persist;
pub mod recognition;
pub mod roster;
pub mod trainer;
pub mod types;

pub use attendance::{AttendanceError, AttendanceStore, AttendanceTable, Mark};
pub use cascade::{CascadeClassifier, CascadeError};
pub use dataset::{DatasetError, SampleName, SampleStore};
pub use lbph::{LbphModel, LbphParams, ModelError};
pub use liveness::BlinkGate;
pub use recognition::{FrameVerdict, LivenessMatcher, RecognitionParams, RecognitionState};
pub use roster::{Roster, RosterEntry, RosterError};
pub use trainer::{TrainError, TrainerOptions, TrainingSummary};
pub use types::{DetectParams, Detector, Prediction, Recognizer, Rect, Subject, SubjectId};

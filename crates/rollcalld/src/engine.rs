use crate::config::{Config, Paths};
use crate::{attend, capture, training};
use rollcall_core::{
    AttendanceStore, CascadeClassifier, DetectParams, Detector, LbphModel, ModelError,
    RecognitionParams, RecognitionState, Recognizer, Roster, RosterEntry, RosterError,
    SampleStore, Subject, SubjectId, TrainerOptions, TrainingSummary,
};
use rollcall_hw::{CameraError, FrameSource, FrameSourceOpener};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a {0} session is already active")]
    SessionAlreadyActive(&'static str),
    #[error("Training already in progress.")]
    TrainingInProgress,
    #[error("trained model not found at {0}")]
    ModelMissing(String),
    #[error("model error: {0}")]
    Model(ModelError),
    #[error("cascade unavailable: {0}")]
    Cascade(String),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("subject {0} is not on the roster")]
    SubjectNotFound(SubjectId),
    #[error("subject {0} is inactive")]
    SubjectInactive(SubjectId),
    #[error("roster error: {0}")]
    Roster(#[from] RosterError),
    #[error("sample count must be positive")]
    InvalidTargetCount,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Missing(path) => Self::ModelMissing(path),
            other => Self::Model(other),
        }
    }
}

/// Enrollment session progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    Running {
        subject_id: SubjectId,
        captured: u32,
        target: u32,
    },
    Completed {
        subject_id: SubjectId,
        captured: u32,
    },
    Stopped {
        subject_id: SubjectId,
        captured: u32,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingState {
    #[default]
    Idle,
    Running {
        message: String,
    },
    Succeeded {
        message: String,
        summary: TrainingSummary,
    },
    Failed {
        message: String,
    },
}

/// Everything a client can observe about the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub capture: CaptureState,
    pub recognition: RecognitionState,
    pub training: TrainingState,
}

pub(crate) type StatusTx = Arc<watch::Sender<EngineStatus>>;

/// Source of cameras, cascades and the recognition model.
pub trait Backend: Send + Sync {
    fn open_camera(&self, device_index: u32) -> Result<Box<dyn FrameSource>, CameraError>;
    fn face_detector(&self) -> Result<Arc<dyn Detector>, EngineError>;
    fn eye_detector(&self) -> Result<Arc<dyn Detector>, EngineError>;
    fn load_recognizer(&self, model: &Path) -> Result<Arc<dyn Recognizer>, EngineError>;
}

/// Backend over real V4L2 devices and files on disk.
///
/// Both cascades are loaded once at construction. A cascade that fails to
/// load is reported by every operation that needs it.
pub struct DiskBackend {
    opener: Box<dyn FrameSourceOpener>,
    face: Result<Arc<dyn Detector>, String>,
    eyes: Result<Arc<dyn Detector>, String>,
}

impl DiskBackend {
    pub fn new(paths: &Paths, opener: Box<dyn FrameSourceOpener>) -> Self {
        Self {
            opener,
            face: load_cascade(&paths.face_cascade),
            eyes: load_cascade(&paths.eye_cascade),
        }
    }
}

fn load_cascade(path: &Path) -> Result<Arc<dyn Detector>, String> {
    match CascadeClassifier::load(path) {
        Ok(cascade) => Ok(Arc::new(cascade)),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load cascade");
            Err(e.to_string())
        }
    }
}

impl Backend for DiskBackend {
    fn open_camera(&self, device_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
        self.opener.open(device_index)
    }

    fn face_detector(&self) -> Result<Arc<dyn Detector>, EngineError> {
        self.face.clone().map_err(EngineError::Cascade)
    }

    fn eye_detector(&self) -> Result<Arc<dyn Detector>, EngineError> {
        self.eyes.clone().map_err(EngineError::Cascade)
    }

    fn load_recognizer(&self, model: &Path) -> Result<Arc<dyn Recognizer>, EngineError> {
        Ok(Arc::new(LbphModel::load(model)?))
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub camera_index: u32,
    pub paths: Paths,
    pub capture_detect: DetectParams,
    pub default_sample_count: u32,
    pub recognition: RecognitionParams,
    pub training: TrainerOptions,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_index: config.camera_index,
            paths: config.paths(),
            capture_detect: config.capture_detect,
            default_sample_count: config.samples_per_enrollment,
            recognition: config.recognition_params(),
            training: TrainerOptions {
                detect: config.training_detect,
                ..TrainerOptions::default()
            },
        }
    }
}

struct RecognitionParts {
    recognizer: Arc<dyn Recognizer>,
    faces: Arc<dyn Detector>,
    eyes: Arc<dyn Detector>,
    source: Box<dyn FrameSource>,
}

/// A running worker thread and its stop signal.
struct Session {
    cancel: CancellationToken,
    /// Raised by the worker before it publishes its terminal state.
    finished: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_active(&self) -> bool {
        !self.finished.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    /// Cancel and wait for the worker to release its resources.
    fn stop(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
}

/// Replace a finished session, or refuse if one is still running.
///
/// A worker that has published its terminal state may still be unwinding;
/// joining it here only waits for the thread to return.
fn claim_slot(slot: &mut Option<Session>, kind: &'static str) -> Result<(), EngineError> {
    if slot.as_ref().is_some_and(Session::is_active) {
        return Err(EngineError::SessionAlreadyActive(kind));
    }
    if let Some(done) = slot.take() {
        done.stop();
    }
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Coordinates enrollment capture, recognition and training.
///
/// Capture and recognition each run on a dedicated OS thread that owns the
/// camera for the whole session. Training runs on its own thread and reports
/// through a channel drained by a listener task.
pub struct Engine {
    backend: Arc<dyn Backend>,
    settings: EngineSettings,
    status: StatusTx,
    capture: Mutex<Option<Session>>,
    recognition: Mutex<Option<Session>>,
    training: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>, settings: EngineSettings) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        Self {
            backend,
            settings,
            status: Arc::new(status),
            capture: Mutex::new(None),
            recognition: Mutex::new(None),
            training: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Active roster entries.
    pub fn roster(&self) -> Result<Vec<RosterEntry>, EngineError> {
        let roster = Roster::load(&self.settings.paths.roster)?;
        Ok(roster.active().cloned().collect())
    }

    fn enrollable_subject(&self, subject_id: SubjectId) -> Result<Subject, EngineError> {
        let roster = Roster::load(&self.settings.paths.roster)?;
        let entry = roster
            .get(subject_id)
            .ok_or(EngineError::SubjectNotFound(subject_id))?;
        if !entry.is_active() {
            return Err(EngineError::SubjectInactive(subject_id));
        }
        Ok(entry.subject())
    }

    /// Begin an enrollment session. `target_count == 0` uses the configured default.
    ///
    /// The camera is opened before returning, so a busy device fails here.
    pub fn start_capture(&self, subject_id: SubjectId, target_count: u32) -> Result<(), EngineError> {
        let target = match target_count {
            0 => self.settings.default_sample_count,
            n => n,
        };
        if target == 0 {
            return Err(EngineError::InvalidTargetCount);
        }

        let mut slot = lock(&self.capture);
        claim_slot(&mut slot, "capture")?;

        let subject = self.enrollable_subject(subject_id)?;
        let detector = self.backend.face_detector()?;
        let source = self.backend.open_camera(self.settings.camera_index)?;
        tracing::info!(
            subject_id,
            target,
            device = self.settings.camera_index,
            "capture session started"
        );

        self.status.send_modify(|s| {
            s.capture = CaptureState::Running {
                subject_id,
                captured: 0,
                target,
            }
        });

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let job = capture::CaptureJob {
            subject,
            target,
            source,
            detector,
            params: self.settings.capture_detect,
            store: SampleStore::new(&self.settings.paths.dataset),
            cancel: cancel.clone(),
            finished: finished.clone(),
            status: self.status.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("rollcall-capture".into())
            .spawn(move || capture::run(job))?;

        *slot = Some(Session {
            cancel,
            finished,
            handle,
        });
        Ok(())
    }

    /// Stop enrollment and wait until the camera is released.
    /// Returns whether a session was running.
    pub fn stop_capture(&self) -> bool {
        let session = lock(&self.capture).take();
        match session {
            Some(session) => {
                let was_active = session.is_active();
                session.stop();
                was_active
            }
            None => false,
        }
    }

    /// Begin confirming that `subject_id` is present.
    ///
    /// Model and cascades are loaded before the camera is opened; any failure
    /// leaves recognition in the error state without touching the device.
    pub fn start_recognition(&self, subject_id: SubjectId) -> Result<(), EngineError> {
        let mut slot = lock(&self.recognition);
        claim_slot(&mut slot, "recognition")?;

        match Roster::load(&self.settings.paths.roster) {
            Ok(roster) => {
                if roster.get(subject_id).is_some_and(|e| !e.is_active()) {
                    return Err(EngineError::SubjectInactive(subject_id));
                }
            }
            Err(e) => tracing::debug!(error = %e, "roster unavailable for recognition"),
        }

        let parts = match self.prepare_recognition() {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(subject_id, error = %e, "recognition failed to start");
                self.status.send_modify(|s| {
                    s.recognition = RecognitionState::Error {
                        message: e.to_string(),
                    }
                });
                return Err(e);
            }
        };
        tracing::info!(subject_id, device = self.settings.camera_index, "recognition started");

        self.status.send_modify(|s| {
            s.recognition = RecognitionState::Running {
                subject_id,
                blinks: 0,
            }
        });

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let job = attend::RecognitionJob {
            subject_id,
            params: self.settings.recognition,
            source: parts.source,
            faces: parts.faces,
            eyes: parts.eyes,
            recognizer: parts.recognizer,
            attendance: AttendanceStore::new(&self.settings.paths.attendance),
            roster: self.settings.paths.roster.clone(),
            cancel: cancel.clone(),
            finished: finished.clone(),
            status: self.status.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("rollcall-recognition".into())
            .spawn(move || attend::run(job))?;

        *slot = Some(Session {
            cancel,
            finished,
            handle,
        });
        Ok(())
    }

    /// Camera last, so that model or cascade problems never claim the device.
    fn prepare_recognition(&self) -> Result<RecognitionParts, EngineError> {
        let recognizer = self.backend.load_recognizer(&self.settings.paths.model)?;
        let faces = self.backend.face_detector()?;
        let eyes = self.backend.eye_detector()?;
        let source = self.backend.open_camera(self.settings.camera_index)?;
        Ok(RecognitionParts {
            recognizer,
            faces,
            eyes,
            source,
        })
    }

    /// Stop recognition and wait until the camera is released.
    /// Returns whether a session was running.
    pub fn stop_recognition(&self) -> bool {
        let session = lock(&self.recognition).take();
        match session {
            Some(session) => {
                let was_active = session.is_active();
                session.stop();
                was_active
            }
            None => false,
        }
    }

    /// Start a training run in the background. Must be called from within
    /// a Tokio runtime; progress and the result appear in [`EngineStatus`].
    pub fn train(&self) -> Result<(), EngineError> {
        if self.training.swap(true, Ordering::SeqCst) {
            return Err(EngineError::TrainingInProgress);
        }

        let started = self.spawn_training();
        if let Err(e) = &started {
            tracing::error!(error = %e, "training failed to start");
            self.training.store(false, Ordering::SeqCst);
            self.status.send_modify(|s| {
                s.training = TrainingState::Failed {
                    message: e.to_string(),
                }
            });
        }
        started
    }

    fn spawn_training(&self) -> Result<(), EngineError> {
        let detector = self.backend.face_detector()?;
        let (tx, rx) = mpsc::unbounded_channel();

        self.status.send_modify(|s| {
            s.training = TrainingState::Running {
                message: rollcall_core::trainer::STARTING_MESSAGE.to_string(),
            }
        });
        training::spawn_worker(
            SampleStore::new(&self.settings.paths.dataset),
            self.settings.paths.model.clone(),
            Some(detector),
            self.settings.training,
            tx,
        )?;
        tokio::spawn(training::listen(rx, self.status.clone(), self.training.clone()));
        Ok(())
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::SeqCst)
    }

    /// Stop any camera session. A running training job is left to finish.
    pub fn shutdown(&self) {
        if self.stop_capture() {
            tracing::info!("capture stopped for shutdown");
        }
        if self.stop_recognition() {
            tracing::info!("recognition stopped for shutdown");
        }
    }
}

use crate::engine::{Engine, EngineError};
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: Arc<Engine>,
}

impl AttendanceService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn failed(e: EngineError) -> fdo::Error {
    fdo::Error::Failed(e.to_string())
}

/// Run a camera-touching engine call off the executor; stop waits for the
/// worker thread to join.
async fn blocking<T, F>(f: F) -> fdo::Result<T>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| fdo::Error::Failed(format!("engine task failed: {e}")))?
        .map_err(failed)
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Start an enrollment capture session. `target_count` 0 uses the default.
    async fn enroll(&self, subject_id: i64, target_count: u32) -> fdo::Result<()> {
        tracing::info!(subject_id, target_count, "enroll requested");
        let engine = self.engine.clone();
        blocking(move || engine.start_capture(subject_id, target_count)).await
    }

    /// Stop the enrollment session. Returns whether one was running.
    async fn stop_enroll(&self) -> fdo::Result<bool> {
        tracing::info!("stop enroll requested");
        let engine = self.engine.clone();
        blocking(move || Ok(engine.stop_capture())).await
    }

    /// Start confirming that `subject_id` is present.
    async fn attend(&self, subject_id: i64) -> fdo::Result<()> {
        tracing::info!(subject_id, "attend requested");
        let engine = self.engine.clone();
        blocking(move || engine.start_recognition(subject_id)).await
    }

    /// Stop recognition. Returns whether it was running.
    async fn stop_attend(&self) -> fdo::Result<bool> {
        tracing::info!("stop attend requested");
        let engine = self.engine.clone();
        blocking(move || Ok(engine.stop_recognition())).await
    }

    /// Start a training run in the background.
    async fn train(&self) -> fdo::Result<()> {
        tracing::info!("train requested");
        self.engine.train().map_err(failed)
    }

    /// Engine status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.engine.status();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "capture": status.capture,
            "recognition": &status.recognition,
            "training": status.training,
            "recognition_active": status.recognition.is_running(),
            "training_active": self.engine.is_training(),
        })
        .to_string())
    }

    /// Active roster entries as JSON.
    async fn roster(&self) -> fdo::Result<String> {
        let entries = self.engine.roster().map_err(failed)?;
        serde_json::to_string(&entries).map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}

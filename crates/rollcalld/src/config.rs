use rollcall_core::{DetectParams, RecognitionParams};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file (`$ROLLCALL_CONFIG`, or
/// `rollcall.toml` in the data directory), then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the dataset, model, attendance and roster files.
    pub data_dir: PathBuf,
    /// V4L2 index of the attendance camera (`/dev/videoN`).
    pub camera_index: u32,
    /// Frontal-face cascade XML; defaults to `<data_dir>/haarcascade_frontalface_default.xml`.
    pub face_cascade: Option<PathBuf>,
    /// Eye cascade XML; defaults to `<data_dir>/haarcascade_eye.xml`.
    pub eye_cascade: Option<PathBuf>,
    /// Distance below which a prediction counts as the target subject.
    pub confidence_threshold: f64,
    /// Blink count that must be exceeded before attendance is recorded.
    pub required_blinks: u32,
    /// Default enrollment sample count when a client passes zero.
    pub samples_per_enrollment: u32,
    pub capture_detect: DetectParams,
    pub recognition_detect: DetectParams,
    pub eye_detect: DetectParams,
    pub training_detect: DetectParams,
}

impl Default for Config {
    fn default() -> Self {
        let recognition = RecognitionParams::default();
        Self {
            data_dir: default_data_dir(),
            camera_index: 0,
            face_cascade: None,
            eye_cascade: None,
            confidence_threshold: recognition.confidence_threshold,
            required_blinks: recognition.required_blinks,
            samples_per_enrollment: 30,
            capture_detect: DetectParams::new(1.3, 5),
            recognition_detect: recognition.face,
            eye_detect: recognition.eyes,
            training_detect: rollcall_core::trainer::TRAINING_DETECT,
        }
    }
}

/// On-disk layout derived from the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub dataset: PathBuf,
    pub model: PathBuf,
    pub attendance: PathBuf,
    pub roster: PathBuf,
    pub face_cascade: PathBuf,
    pub eye_cascade: PathBuf,
}

impl Paths {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            dataset: data_dir.join("dataset"),
            model: data_dir.join("trainer").join("trainer.yml"),
            attendance: data_dir.join("Attendance").join("attendance.csv"),
            roster: data_dir.join("students.csv"),
            face_cascade: data_dir.join("haarcascade_frontalface_default.xml"),
            eye_cascade: data_dir.join("haarcascade_eye.xml"),
        }
    }
}

impl Config {
    /// Load configuration from file and `ROLLCALL_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let env_data_dir = std::env::var("ROLLCALL_DATA_DIR").ok().map(PathBuf::from);
        let file = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env_data_dir
                    .clone()
                    .unwrap_or_else(default_data_dir)
                    .join("rollcall.toml")
            });

        let mut config = match std::fs::read_to_string(&file) {
            Ok(text) => {
                tracing::info!(path = %file.display(), "loading config file");
                Self::from_toml(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", file.display())),
        };

        if let Some(dir) = env_data_dir {
            config.data_dir = dir;
        }
        config.camera_index = env_u32("ROLLCALL_CAMERA_INDEX", config.camera_index);
        config.confidence_threshold =
            env_f64("ROLLCALL_CONFIDENCE_THRESHOLD", config.confidence_threshold);
        config.required_blinks = env_u32("ROLLCALL_REQUIRED_BLINKS", config.required_blinks);
        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn paths(&self) -> Paths {
        let mut paths = Paths::under(&self.data_dir);
        if let Some(p) = &self.face_cascade {
            paths.face_cascade = p.clone();
        }
        if let Some(p) = &self.eye_cascade {
            paths.eye_cascade = p.clone();
        }
        paths
    }

    pub fn recognition_params(&self) -> RecognitionParams {
        RecognitionParams {
            confidence_threshold: self.confidence_threshold,
            required_blinks: self.required_blinks,
            face: self.recognition_detect,
            eyes: self.eye_detect,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

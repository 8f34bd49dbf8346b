//! Local Binary Pattern Histograms (LBPH) face recognizer.
//!
//! Wraps OpenCV's `face::LBPHFaceRecognizer`. Models are persisted in
//! OpenCV's own YAML layout (`trainer.yml`), so models written by other
//! OpenCV programs load unchanged. Prediction distances are OpenCV's
//! chi-square values: lower means closer.

use crate::imageops;
use crate::persist;
use crate::types::{Prediction, Recognizer, SubjectId};
use image::GrayImage;
use opencv::core::{Mat, Ptr, Vector};
use opencv::face::{FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const DEFAULT_RADIUS: i32 = 1;
const DEFAULT_NEIGHBORS: i32 = 8;
const DEFAULT_GRID: i32 = 8;
const MAX_NEIGHBORS: i32 = 16;
/// Upper bound on one sample's spatial histogram, in bins.
const MAX_HISTOGRAM_LEN: u64 = 1 << 24;
/// OpenCV's "never reject" threshold; distance gating happens in the caller.
const NO_THRESHOLD: f64 = f64::MAX;
/// Label OpenCV reports when it has nothing to compare against.
const NO_LABEL: i32 = -1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    Missing(String),
    #[error("model I/O failed for {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("no training samples")]
    NoSamples,
}

/// LBP operator and grid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: i32,
    pub neighbors: i32,
    pub grid_x: i32,
    pub grid_y: i32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            neighbors: DEFAULT_NEIGHBORS,
            grid_x: DEFAULT_GRID,
            grid_y: DEFAULT_GRID,
        }
    }
}

impl LbphParams {
    /// Bins in one sample's histogram, `None` on overflow.
    fn histogram_len(&self) -> Option<u64> {
        let cells = u64::try_from(self.grid_x).ok()?.checked_mul(u64::try_from(self.grid_y).ok()?)?;
        cells.checked_mul(1u64.checked_shl(u32::try_from(self.neighbors).ok()?)?)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.radius <= 0 {
            return Err(ModelError::Invalid(format!("radius must be positive, got {}", self.radius)));
        }
        if !(1..=MAX_NEIGHBORS).contains(&self.neighbors) {
            return Err(ModelError::Invalid(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x <= 0 || self.grid_y <= 0 {
            return Err(ModelError::Invalid(format!(
                "grid must be at least 1x1, got {}x{}",
                self.grid_x, self.grid_y
            )));
        }
        match self.histogram_len() {
            Some(len) if len <= MAX_HISTOGRAM_LEN => Ok(()),
            _ => Err(ModelError::Invalid(format!(
                "{}x{} grid with {} neighbors is too large",
                self.grid_x, self.grid_y, self.neighbors
            ))),
        }
    }
}

/// Trained LBPH model.
pub struct LbphModel {
    recognizer: Mutex<Ptr<LBPHFaceRecognizer>>,
    params: LbphParams,
    labels: Vec<i32>,
}

impl LbphModel {
    /// Build a model from labelled face crops.
    pub fn train(params: LbphParams, samples: &[(SubjectId, GrayImage)]) -> Result<Self, ModelError> {
        params.validate()?;
        if samples.is_empty() {
            return Err(ModelError::NoSamples);
        }

        let mut images = Vector::<Mat>::with_capacity(samples.len());
        let mut labels = Vec::with_capacity(samples.len());
        for (subject_id, face) in samples {
            let label = i32::try_from(*subject_id)
                .map_err(|_| ModelError::Invalid(format!("subject id {subject_id} does not fit a model label")))?;
            images.push(imageops::to_mat(face)?);
            labels.push(label);
        }

        let mut recognizer = create(params)?;
        recognizer.train(&images, &Vector::<i32>::from_slice(&labels))?;

        tracing::debug!(samples = labels.len(), "LBPH model trained");
        Ok(Self {
            recognizer: Mutex::new(recognizer),
            params,
            labels,
        })
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    /// Number of training faces.
    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct subjects represented.
    pub fn subject_count(&self) -> usize {
        self.labels.iter().collect::<BTreeSet<_>>().len()
    }

    /// Write OpenCV YAML, replacing any existing model atomically.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let recognizer = self.lock();
        persist::replace_with_file(path, ".yml", |staging| {
            FaceRecognizerTraitConst::write(&*recognizer, &staging.to_string_lossy()).map_err(std::io::Error::other)
        })
        .map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            samples = self.sample_count(),
            subjects = self.subject_count(),
            "model saved"
        );
        Ok(())
    }

    /// Load and validate a persisted model.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Missing(path.display().to_string()));
        }
        let mut recognizer = create(LbphParams::default())?;
        FaceRecognizerTrait::read(&mut recognizer, &path.to_string_lossy())?;

        let params = LbphParams {
            radius: recognizer.get_radius()?,
            neighbors: recognizer.get_neighbors()?,
            grid_x: recognizer.get_grid_x()?,
            grid_y: recognizer.get_grid_y()?,
        };
        params.validate()?;
        let labels = labels_of(&recognizer.get_labels()?)?;
        if labels.is_empty() {
            return Err(ModelError::Invalid("model holds no samples".into()));
        }
        let histograms = recognizer.get_histograms()?.len();
        if histograms != labels.len() {
            return Err(ModelError::Invalid(format!(
                "{} labels for {histograms} histograms",
                labels.len()
            )));
        }

        let model = Self {
            recognizer: Mutex::new(recognizer),
            params,
            labels,
        };
        tracing::info!(
            path = %path.display(),
            samples = model.sample_count(),
            subjects = model.subject_count(),
            "model loaded"
        );
        Ok(model)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ptr<LBPHFaceRecognizer>> {
        self.recognizer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn predict_mat(&self, face: &GrayImage) -> opencv::Result<(i32, f64)> {
        let mat = imageops::to_mat(face)?;
        let (mut label, mut distance) = (NO_LABEL, f64::MAX);
        self.lock().predict(&mat, &mut label, &mut distance)?;
        Ok((label, distance))
    }
}

fn create(params: LbphParams) -> opencv::Result<Ptr<LBPHFaceRecognizer>> {
    LBPHFaceRecognizer::create(params.radius, params.neighbors, params.grid_x, params.grid_y, NO_THRESHOLD)
}

fn labels_of(labels: &Mat) -> Result<Vec<i32>, ModelError> {
    if labels.rows() == 0 || labels.cols() == 0 {
        return Ok(Vec::new());
    }
    Ok(labels.data_typed::<i32>()?.to_vec())
}

impl Recognizer for LbphModel {
    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        match self.predict_mat(face) {
            Ok((NO_LABEL, _)) => None,
            Ok((label, distance)) => Some(Prediction {
                subject_id: SubjectId::from(label),
                distance,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "LBPH prediction failed");
                None
            }
        }
    }
}

//! Model training over the whole enrollment dataset.
//!
//! Individual unreadable or misnamed samples are skipped with a warning.
//! The model file is only replaced when training produced a model.

use crate::dataset::{DatasetError, SampleName, SampleStore};
use crate::imageops;
use crate::lbph::{LbphModel, LbphParams, ModelError};
use crate::types::{DetectParams, Detector, SubjectId};
use image::GrayImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Re-detection parameters applied to stored samples.
pub const TRAINING_DETECT: DetectParams = DetectParams::new(1.1, 3);

/// First progress message of every run.
pub const STARTING_MESSAGE: &str = "Training faces... Please wait.";

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Dataset is empty.")]
    EmptyDataset,
    #[error("No faces found in dataset.")]
    NoFacesFound,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Outcome of a successful training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    /// Distinct subjects in the model.
    pub subjects: usize,
    /// Face regions the model was trained on.
    pub faces: usize,
    /// Sample images that decoded and parsed.
    pub images: usize,
    /// Files skipped because of a bad name or undecodable content.
    pub skipped: usize,
}

impl TrainingSummary {
    pub fn message(&self) -> String {
        format!("Training complete. {} face(s) trained.", self.subjects)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrainerOptions {
    pub lbph: LbphParams,
    pub detect: DetectParams,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            lbph: LbphParams::default(),
            detect: TRAINING_DETECT,
        }
    }
}

/// Train a model from every sample in `dataset` and write it to `output`.
///
/// With a `detector`, each sample is re-scanned and every detected region is
/// a training face; samples without a region contribute nothing. Without
/// one, each sample is used whole. `progress` receives human-readable status.
pub fn train(
    dataset: &SampleStore,
    output: &Path,
    detector: Option<&dyn Detector>,
    options: TrainerOptions,
    mut progress: impl FnMut(&str),
) -> Result<TrainingSummary, TrainError> {
    let files = dataset.list()?;
    if files.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    progress(STARTING_MESSAGE);
    tracing::info!(root = %dataset.root().display(), files = files.len(), "training started");

    let mut faces: Vec<(SubjectId, GrayImage)> = Vec::new();
    let mut images = 0usize;
    let mut skipped = 0usize;

    for path in &files {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let name = match SampleName::parse(file_name) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping sample");
                skipped += 1;
                continue;
            }
        };
        let image = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable sample");
                skipped += 1;
                continue;
            }
        };
        images += 1;

        match detector {
            Some(det) => {
                let regions = det.detect(&image, options.detect);
                if regions.is_empty() {
                    tracing::debug!(path = %path.display(), "no face region in sample");
                }
                faces.extend(
                    regions
                        .into_iter()
                        .filter_map(|r| imageops::crop(&image, r))
                        .map(|crop| (name.subject_id, crop)),
                );
            }
            None => faces.push((name.subject_id, image)),
        }
    }

    if images == 0 {
        return Err(TrainError::EmptyDataset);
    }
    if faces.is_empty() {
        return Err(TrainError::NoFacesFound);
    }

    progress(&format!("Training on {} face(s) from {images} image(s)...", faces.len()));
    let model = LbphModel::train(options.lbph, &faces)?;
    model.save(output)?;

    let summary = TrainingSummary {
        subjects: model.subject_count(),
        faces: model.sample_count(),
        images,
        skipped,
    };
    tracing::info!(
        subjects = summary.subjects,
        faces = summary.faces,
        images = summary.images,
        skipped = summary.skipped,
        "training finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use image::Luma;

    struct NoFaces;
    impl Detector for NoFaces {
        fn detect(&self, _: &GrayImage, _: DetectParams) -> Vec<Rect> {
            Vec::new()
        }
    }

    /// Reports the top-left quadrant as a face.
    struct QuadrantFace;
    impl Detector for QuadrantFace {
        fn detect(&self, image: &GrayImage, _: DetectParams) -> Vec<Rect> {
            vec![Rect::new(0, 0, image.width() as i32 / 2, image.height() as i32 / 2)]
        }
    }

    fn face(seed: u8) -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 3) as u8).wrapping_mul(seed)]))
    }

    fn fixture() -> (tempfile::TempDir, SampleStore, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("dataset"));
        let output = dir.path().join("trainer/trainer.yml");
        (dir, store, output)
    }

    #[test]
    fn test_empty_dataset() {
        let (_dir, store, output) = fixture();
        std::fs::create_dir_all(store.root()).unwrap();
        let err = train(&store, &output, None, TrainerOptions::default(), |_| {}).unwrap_err();
        assert!(matches!(err, TrainError::EmptyDataset));
        assert!(!output.exists());
    }

    #[test]
    fn test_undecodable_only_keeps_previous_model() {
        let (_dir, store, output) = fixture();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(store.root().join("Ada_1_1.jpg"), b"not a jpeg").unwrap();
        std::fs::write(store.root().join("readme.txt"), b"hello").unwrap();
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"previous model").unwrap();

        let err = train(&store, &output, None, TrainerOptions::default(), |_| {}).unwrap_err();
        assert!(matches!(err, TrainError::EmptyDataset));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous model");
    }

    #[test]
    fn test_two_subjects() {
        let (_dir, store, output) = fixture();
        for seq in 1..=3 {
            store.write(&SampleName::new("Ada", 1, seq), &face(3)).unwrap();
            store.write(&SampleName::new("Alan", 2, seq), &face(5)).unwrap();
        }
        std::fs::write(store.root().join("stray.txt"), b"x").unwrap();

        let mut messages = Vec::new();
        let summary = train(&store, &output, None, TrainerOptions::default(), |m| messages.push(m.to_string())).unwrap();

        assert_eq!(summary.subjects, 2);
        assert_eq!(summary.images, 6);
        assert_eq!(summary.faces, 6);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.message(), "Training complete. 2 face(s) trained.");
        assert_eq!(messages.first().map(String::as_str), Some(STARTING_MESSAGE));
        assert_eq!(LbphModel::load(&output).unwrap().subject_count(), 2);
    }

    #[test]
    fn test_redetection_without_faces() {
        let (_dir, store, output) = fixture();
        store.write(&SampleName::new("Ada", 1, 1), &face(3)).unwrap();
        let err = train(&store, &output, Some(&NoFaces as &dyn Detector), TrainerOptions::default(), |_| {}).unwrap_err();
        assert!(matches!(err, TrainError::NoFacesFound));
        assert!(!output.exists());
    }

    #[test]
    fn test_redetection_crops_regions() {
        let (_dir, store, output) = fixture();
        store.write(&SampleName::new("Ada", 1, 1), &face(3)).unwrap();
        store.write(&SampleName::new("Ada", 1, 2), &face(3)).unwrap();
        let summary = train(&store, &output, Some(&QuadrantFace as &dyn Detector), TrainerOptions::default(), |_| {}).unwrap();
        assert_eq!(summary.faces, 2);
        assert_eq!(summary.subjects, 1);
    }
}

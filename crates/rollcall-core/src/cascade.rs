//! Haar cascade detection backed by OpenCV's `objdetect` module.
//!
//! Loads the stock `haarcascade_*.xml` assets and exposes them through the
//! [`Detector`] seam so that workers and tests never touch OpenCV types.

use crate::imageops;
use crate::types::{DetectParams, Detector, Rect};
use image::GrayImage;
use opencv::core::{Size, Vector};
use opencv::objdetect;
use opencv::prelude::*;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to load cascade {path}: {source}")]
    Load {
        path: String,
        source: opencv::Error,
    },
    #[error("cascade {0} holds no classifier")]
    Empty(String),
}

/// A loaded cascade. Scans are serialized; OpenCV mutates the classifier
/// while detecting.
pub struct CascadeClassifier {
    inner: Mutex<objdetect::CascadeClassifier>,
    path: String,
}

impl CascadeClassifier {
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        let shown = path.display().to_string();
        if !path.exists() {
            return Err(CascadeError::NotFound(shown));
        }
        let load_err = |source| CascadeError::Load {
            path: shown.clone(),
            source,
        };
        let classifier = objdetect::CascadeClassifier::new(&path.to_string_lossy()).map_err(load_err)?;
        if classifier.empty().map_err(load_err)? {
            return Err(CascadeError::Empty(shown));
        }

        tracing::info!(path = %shown, "loaded Haar cascade");
        Ok(Self {
            inner: Mutex::new(classifier),
            path: shown,
        })
    }

    fn scan(&self, image: &GrayImage, params: DetectParams) -> opencv::Result<Vec<Rect>> {
        let mat = imageops::to_mat(image)?;
        let mut found = Vector::<opencv::core::Rect>::new();
        let min_neighbors = i32::try_from(params.min_neighbors).unwrap_or(i32::MAX);
        let mut classifier = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        classifier.detect_multi_scale(
            &mat,
            &mut found,
            params.scale_factor,
            min_neighbors,
            0,
            Size::new(0, 0),
            Size::new(0, 0),
        )?;
        Ok(found.iter().map(Rect::from).collect())
    }
}

impl Detector for CascadeClassifier {
    fn detect(&self, image: &GrayImage, params: DetectParams) -> Vec<Rect> {
        match self.scan(image, params) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(cascade = %self.path, error = %e, "cascade scan failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// First two stages of a stump-based 20x20 eye cascade, kept in the
    /// layout of the stock OpenCV assets (comments between stages, params
    /// blocks, values on their own lines).
    const EYE_CASCADE_EXCERPT: &str = r#"<?xml version="1.0"?>
<!--
    Stump-based 20x20 frontal eye detector.
    Trimmed to its first two stages.
-->
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stageParams>
    <maxWeakCount>3</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>2</stageNum>
  <stages>
    <_>
      <maxWeakCount>2</maxWeakCount>
      <stageThreshold>-1.4562760591506958e+00</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.2963959574699402e-01</internalNodes>
          <leafValues>
            -7.7304208278656006e-01 6.8350148200988770e-01</leafValues></_>
        <_>
          <internalNodes>
            0 -1 1 -4.6326808631420135e-02</internalNodes>
          <leafValues>
            5.7352751493453979e-01 -4.9847280979156494e-01</leafValues></_></weakClassifiers></_>
    <!-- stage 1 -->
    <_>
      <maxWeakCount>3</maxWeakCount>
      <stageThreshold>-1.2550230026245117e+00</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 2 -1.6173090785741806e-02</internalNodes>
          <leafValues>
            6.0254341363906860e-01 -5.6669312715530396e-01</leafValues></_>
        <_>
          <internalNodes>
            0 -1 3 -5.0377830862998962e-02</internalNodes>
          <leafValues>
            4.4932019710540771e-01 -4.6097230911254883e-01</leafValues></_>
        <_>
          <internalNodes>
            0 -1 4 -1.5111840300232172e-03</internalNodes>
          <leafValues>
            4.6305119991302490e-01 -3.4735518693923950e-01</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 8 20 12 -1.</_>
        <_>
          0 14 20 6 2.</_></rects></_>
    <_>
      <rects>
        <_>
          9 1 4 15 -1.</_>
        <_>
          9 6 4 5 3.</_></rects></_>
    <_>
      <rects>
        <_>
          6 3 9 12 -1.</_>
        <_>
          9 3 3 12 3.</_></rects></_>
    <_>
      <rects>
        <_>
          2 2 16 12 -1.</_>
        <_>
          2 6 16 4 3.</_></rects></_>
    <_>
      <rects>
        <_>
          0 0 3 1 -1.</_>
        <_>
          1 0 1 1 3.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn write_fixture(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_loads_stock_cascade_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "haarcascade_eye.xml", EYE_CASCADE_EXCERPT);
        assert!(CascadeClassifier::load(&path).is_ok());
    }

    #[test]
    fn test_flat_image_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "haarcascade_eye.xml", EYE_CASCADE_EXCERPT);
        let cascade = CascadeClassifier::load(&path).unwrap();

        for level in [0u8, 40, 128, 255] {
            let flat = GrayImage::from_pixel(64, 64, Luma([level]));
            assert!(cascade.detect(&flat, DetectParams::new(1.1, 0)).is_empty(), "level {level}");
        }
    }

    #[test]
    fn test_image_smaller_than_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "haarcascade_eye.xml", EYE_CASCADE_EXCERPT);
        let cascade = CascadeClassifier::load(&path).unwrap();
        let tiny = GrayImage::from_fn(12, 12, |x, y| Luma([((x * 31 + y * 17) % 256) as u8]));
        assert!(cascade.detect(&tiny, DetectParams::new(1.2, 5)).is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = CascadeClassifier::load(Path::new("/nonexistent/haarcascade_eye.xml")).err().unwrap();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }

    #[test]
    fn test_rejects_file_without_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "empty.xml",
            "<?xml version=\"1.0\"?>\n<opencv_storage>\n</opencv_storage>\n",
        );
        assert!(CascadeClassifier::load(&path).is_err());
    }
}

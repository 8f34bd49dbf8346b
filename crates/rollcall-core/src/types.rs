use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Roster identity of a subject (the `StudentID` column).
pub type SubjectId = i64;

/// Parse an id cell, also accepting the `7.0` form spreadsheet tools write.
pub fn parse_subject_id(raw: &str) -> Option<SubjectId> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<SubjectId>() {
        return Some(id);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as SubjectId)
}

/// A roster identity as seen by the attendance pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: SubjectId,
    pub display_name: String,
}

/// Integer bounding box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `width`×`height` image, returning `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width).min(width as i32);
        let y1 = (self.y + self.height).min(height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Multi-scale scan parameters for a cascade detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Pyramid step between scales; must be greater than 1.
    pub scale_factor: f64,
    /// Raw hits a grouped detection needs beyond itself to be reported.
    pub min_neighbors: u32,
}

impl DetectParams {
    pub const fn new(scale_factor: f64, min_neighbors: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
        }
    }
}

impl Default for DetectParams {
    fn default() -> Self {
        Self::new(1.1, 3)
    }
}

/// Result of running the recognition model on one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub subject_id: SubjectId,
    /// Distance to the nearest training sample. Lower = more confident.
    pub distance: f64,
}

/// Finds candidate object regions (faces, eyes) in a grayscale image.
///
/// Output order is scan order; callers must not rely on it.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &GrayImage, params: DetectParams) -> Vec<Rect>;
}

/// Maps a grayscale face crop to the closest known subject.
pub trait Recognizer: Send + Sync {
    /// `None` when the model has nothing to compare against.
    fn predict(&self, face: &GrayImage) -> Option<Prediction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subject_id() {
        assert_eq!(parse_subject_id("7"), Some(7));
        assert_eq!(parse_subject_id(" 12.0 "), Some(12));
        assert_eq!(parse_subject_id("12.5"), None);
        assert_eq!(parse_subject_id("abc"), None);
        assert_eq!(parse_subject_id(""), None);
    }

    #[test]
    fn test_clamp_inside() {
        let r = Rect::new(2, 3, 4, 5);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_partial() {
        let r = Rect::new(-2, 8, 6, 6);
        assert_eq!(r.clamp_to(10, 10), Some(Rect::new(0, 8, 4, 2)));
    }

    #[test]
    fn test_clamp_outside() {
        let r = Rect::new(20, 20, 5, 5);
        assert_eq!(r.clamp_to(10, 10), None);
    }
}

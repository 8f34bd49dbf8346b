//! Small grayscale image helpers shared by detection, enrollment and training.

use crate::types::Rect;
use image::GrayImage;
use opencv::core::{self, Mat};

/// Wrap a raw row-major grayscale buffer. `None` if the length does not match.
pub fn gray_from_raw(data: Vec<u8>, width: u32, height: u32) -> Option<GrayImage> {
    GrayImage::from_raw(width, height, data)
}

/// Copy the region `rect` (clamped to the image) into a new image.
pub fn crop(image: &GrayImage, rect: Rect) -> Option<GrayImage> {
    let r = rect.clamp_to(image.width(), image.height())?;
    Some(image::imageops::crop_imm(image, r.x as u32, r.y as u32, r.width as u32, r.height as u32).to_image())
}

/// Copy into a single-channel 8-bit OpenCV matrix.
pub fn to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    Mat::from_slice_rows_cols(image.as_raw(), image.height() as usize, image.width() as usize)?.try_clone()
}

impl From<core::Rect> for Rect {
    fn from(r: core::Rect) -> Self {
        Rect::new(r.x, r.y, r.width, r.height)
    }
}

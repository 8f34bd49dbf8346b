//! Grayscale frames and the luma extractors for each negotiated pixel layout.

use std::time::Instant;

/// One 8-bit grayscale image read from a frame source.
#[derive(Clone)]
pub struct Frame {
    /// Row-major luma, exactly `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let want = pixel_count(width, height);
        if data.len() != want {
            return Err(FrameError::InvalidLength { expected: want, actual: data.len() });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// Mean luma in `0.0..=255.0`; an empty frame reads as black.
    pub fn avg_brightness(&self) -> f32 {
        match self.data.len() {
            0 => 0.0,
            n => self.data.iter().map(|&p| u64::from(p)).sum::<u64>() as f32 / n as f32,
        }
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// The first `bytes_per_pixel * width * height` bytes of `buf`, or a length error.
fn payload(buf: &[u8], width: u32, height: u32, bytes_per_pixel: usize) -> Result<&[u8], FrameError> {
    let expected = pixel_count(width, height) * bytes_per_pixel;
    buf.get(..expected).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

/// YUYV 4:2:2 stores luma at every even byte (`Y0 U Y1 V`).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    Ok(payload(yuyv, width, height, 2)?.iter().step_by(2).copied().collect())
}

/// Y16 is little-endian; the high byte is the 8-bit value.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    Ok(payload(y16, width, height, 2)?
        .chunks_exact(2)
        .map(|px| px[1])
        .collect())
}

/// GREY is already 8-bit; drivers may pad the buffer past the image.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    Ok(payload(grey, width, height, 1)?.to_vec())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, {expected} required")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_keeps_luma_only() {
        let row = [10, 0, 20, 255, 30, 0, 40, 255];
        assert_eq!(yuyv_to_grayscale(&row, 4, 1).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(matches!(
            yuyv_to_grayscale(&[1, 2, 3], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 3 })
        ));
        assert!(y16_to_grayscale(&[0; 7], 2, 2).is_err());
        assert!(grey_to_grayscale(&[0; 3], 2, 2).is_err());
    }

    #[test]
    fn test_y16_high_byte() {
        let px = [0x34, 0x12, 0x00, 0xFF];
        assert_eq!(y16_to_grayscale(&px, 2, 1).unwrap(), vec![0x12, 0xFF]);
    }

    #[test]
    fn test_grey_ignores_padding() {
        let buf = [5, 6, 7, 8, 0, 0, 0, 0];
        assert_eq!(grey_to_grayscale(&buf, 2, 2).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_frame_length_and_brightness() {
        assert!(Frame::from_gray(vec![0; 3], 2, 2, 0).is_err());
        let frame = Frame::from_gray(vec![0, 255, 255, 0], 2, 2, 3).unwrap();
        assert_eq!(frame.sequence, 3);
        assert!((frame.avg_brightness() - 127.5).abs() < 1e-4);
    }
}

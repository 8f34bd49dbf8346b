//! V4L2 frame source addressed by device index.
//!
//! A [`Camera`] holds a [`DeviceLease`] for its whole lifetime and yields
//! grayscale [`Frame`]s until dropped.

use crate::frame::{self, Frame, FrameError};
use crate::lease::DeviceLease;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 1280;
const REQUESTED_HEIGHT: u32 = 720;
const STREAM_BUFFERS: u32 = 4;
const MAX_SCANNED_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera device {0} unavailable: {1}")]
    DeviceUnavailable(u32, String),
    #[error("camera device {0} is busy")]
    DeviceBusy(u32),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device {0} cannot capture video")]
    StreamingNotSupported(u32),
}

/// A lazy sequence of grayscale frames from an exclusively owned device.
///
/// Dropping the source closes the device and releases its lease.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn read(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Opens frame sources by device index.
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, device_index: u32) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opener backed by real V4L2 devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Opener;

impl FrameSourceOpener for V4l2Opener {
    fn open(&self, device_index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(Camera::open(device_index)?))
    }
}

/// A capture-capable device found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may negotiate; all are reduced to 8-bit gray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2; only the luma bytes are kept.
    Yuyv,
    Grey,
    /// 16-bit little-endian luma.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_gray(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            Self::Grey => frame::grey_to_grayscale(buf, width, height),
            Self::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

/// An open V4L2 capture device.
pub struct Camera {
    // Field order is drop order: stop streaming, close the device, then
    // release the lease.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    lease: DeviceLease,
}

impl Camera {
    /// Open `/dev/video{device_index}` for exclusive capture.
    ///
    /// Fails with [`CameraError::DeviceBusy`] without touching the device if
    /// another source in this process holds the index.
    pub fn open(device_index: u32) -> Result<Self, CameraError> {
        let lease = DeviceLease::acquire(device_index)?;
        let device = open_device(device_index)?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::DeviceUnavailable(device_index, format!("capability query: {e}"))
        })?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported(device_index));
        }
        tracing::info!(
            index = device_index,
            driver = %caps.driver,
            card = %caps.card,
            "camera opened"
        );

        let (width, height, fourcc, pixel_format) = negotiate(&device)?;

        Ok(Self {
            stream: None,
            device,
            width,
            height,
            fourcc,
            pixel_format,
            lease,
        })
    }

    /// Grab one frame, starting the stream on first use.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;
            tracing::debug!(index = self.lease.index(), "stream started");
            self.stream = Some(stream);
        }
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
        let gray = format
            .to_gray(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("{format:?} frame: {e}")))?;

        Frame::from_gray(gray, width, height, meta.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Capture-capable devices among `/dev/video0..15`.
    ///
    /// Indices leased by this process are skipped rather than opened.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_SCANNED_INDEX)
            .filter(|&index| !DeviceLease::is_held(index))
            .filter_map(describe)
            .collect()
    }
}

fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

fn open_device(index: u32) -> Result<Device, CameraError> {
    let path = device_path(index);
    if !Path::new(&path).exists() {
        return Err(CameraError::DeviceUnavailable(index, format!("{path} does not exist")));
    }
    Device::with_path(&path).map_err(|e| match e.raw_os_error() {
        Some(16) => CameraError::DeviceBusy(index), // EBUSY
        _ => CameraError::DeviceUnavailable(index, format!("{path}: {e}")),
    })
}

/// Request 1280x720 YUYV and accept whichever supported layout the driver picks.
fn negotiate(device: &Device) -> Result<(u32, u32, FourCC, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = REQUESTED_WIDTH;
    wanted.height = REQUESTED_HEIGHT;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver chose {:?}; need YUYV, GREY or Y16",
            got.fourcc
        ))
    })?;

    if (got.width, got.height) != (REQUESTED_WIDTH, REQUESTED_HEIGHT) {
        tracing::warn!(
            width = got.width,
            height = got.height,
            "camera did not accept 1280x720"
        );
    }
    tracing::info!(width = got.width, height = got.height, format = ?pixel_format, "format negotiated");
    Ok((got.width, got.height, got.fourcc, pixel_format))
}

fn describe(index: u32) -> Option<DeviceInfo> {
    let path = device_path(index);
    if !Path::new(&path).exists() {
        return None;
    }
    let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
    caps.capabilities
        .contains(CapFlags::VIDEO_CAPTURE)
        .then(|| DeviceInfo {
            index,
            path,
            name: caps.card,
            driver: caps.driver,
            bus: caps.bus,
        })
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        self.capture_frame().map(Some)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(index = self.lease.index(), "releasing camera");
    }
}

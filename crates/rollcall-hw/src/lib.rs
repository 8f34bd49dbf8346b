//! rollcall-hw: Hardware abstraction for exclusive camera capture.
//!
//! Provides V4L2-based frame sources addressed by device index, grayscale
//! frame conversion, and the in-process lease registry that keeps a camera
//! owned by one session at a time.

pub mod camera;
pub mod frame;
pub mod lease;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, FrameSourceOpener, PixelFormat, V4l2Opener};
pub use frame::Frame;
pub use lease::DeviceLease;

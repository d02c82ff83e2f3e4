//! rollcall-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access addressed by logical device index,
//! grayscale frame conversion, and the [`FrameSource`] seam the capture
//! loop reads from.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::Frame;
pub use source::FrameSource;

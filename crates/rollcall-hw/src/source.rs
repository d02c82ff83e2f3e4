use crate::camera::CameraError;
use crate::frame::Frame;

/// Anything that yields grayscale frames one at a time.
///
/// The capture loop owns its source on a worker thread, hence `Send`.
/// A failed read is transient: the caller may simply try again.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable name for logs.
    fn describe(&self) -> String {
        "frame source".to_string()
    }
}

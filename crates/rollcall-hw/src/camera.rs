//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const MAX_DEVICE_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// V4L2 camera device handle. Dropping it releases the device.
///
/// One mmap stream is started at open and dequeued on every capture; it is
/// stopped before the device is closed.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    sequence: u32,
}

/// Path of the V4L2 node for a logical device index.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

impl Camera {
    /// Open the camera at logical index `index` (`/dev/video{index}`).
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let path = device_path(index);
        if !Path::new(&path).exists() {
            return Err(CameraError::DeviceNotFound(path));
        }

        let device = Device::new(index as usize).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = %path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            device,
            index,
            width: negotiated.width,
            height: negotiated.height,
            fourcc,
            pixel_format,
            sequence: 0,
        })
    }

    /// Dequeue the next frame from the running stream, converting to
    /// grayscale if needed.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("stream closed".into()))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = buf_to_grayscale(self.pixel_format, buf, self.width, self.height)?;
        self.sequence = meta.sequence;

        Frame::from_gray(gray, self.width, self.height, meta.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .filter_map(|index| {
                let path = device_path(index);
                if !Path::new(&path).exists() {
                    return None;
                }
                let dev = Device::new(index as usize).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    index,
                    path,
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                })
            })
            .collect()
    }
}

fn buf_to_grayscale(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    let pixels = (width * height) as usize;

    match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {:?})", device_path(self.index), self.width, self.height, self.fourcc)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // STREAMOFF and unmap while the device is still open.
        drop(self.stream.take());
        tracing::info!(device = %device_path(self.index), last_sequence = self.sequence, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(3), "/dev/video3");
    }

    #[test]
    fn test_open_missing_device() {
        // Index far above anything udev hands out.
        let err = Camera::open(250).err().expect("open should fail");
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_grey_buffer_conversion() {
        let buf = [10u8, 20, 30, 40, 99];
        assert_eq!(buf_to_grayscale(PixelFormat::Grey, &buf, 2, 2).unwrap(), vec![10, 20, 30, 40]);
        assert!(matches!(
            buf_to_grayscale(PixelFormat::Grey, &buf[..3], 2, 2),
            Err(CameraError::CaptureFailed(_))
        ));
        // YUYV keeps every other byte (the Y samples).
        let yuyv = [1u8, 128, 2, 128, 3, 128, 4, 128];
        assert_eq!(buf_to_grayscale(PixelFormat::Yuyv, &yuyv, 2, 2).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_consecutive_captures_share_one_stream() {
        // Needs a real camera; skipped when /dev/video0 is absent or busy.
        let Ok(mut camera) = Camera::open(0) else {
            return;
        };
        let first = camera.capture_frame().unwrap();
        let second = camera.capture_frame().unwrap();
        let third = camera.capture_frame().unwrap();
        // A fresh STREAMON per capture restarts the driver's sequence count.
        assert!(second.sequence > first.sequence);
        assert!(third.sequence > second.sequence);
    }
}

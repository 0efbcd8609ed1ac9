//! attend-capture: Frame acquisition from network cameras.
//!
//! Reads MJPEG (`multipart/x-mixed-replace`) streams over HTTP, as served by
//! ESP32-CAM style boards, and decodes each JPEG part into a [`Frame`].

pub mod frame;
pub mod stream;

pub use frame::{Frame, FrameError};
pub use stream::{CaptureError, FrameSource, MjpegReader, MjpegStream};

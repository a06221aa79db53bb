pub mod camera;
pub mod convert;
pub mod frame;
pub mod source;
pub mod synthetic;
pub mod v4l2;

pub use camera::{Camera, CameraError};
pub use frame::{Frame, PixelFormat, RawFrame};
pub use source::{CaptureError, FrameSource};
pub use synthetic::SyntheticCamera;
pub use v4l2::V4l2Camera;

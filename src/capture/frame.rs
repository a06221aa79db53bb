use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// A converted frame travelling through the pipeline.
///
/// Pixels are always packed RGB24, `width * height * 3` bytes. A frame is moved
/// from stage to stage and never mutated after construction.
#[derive(Debug)]
pub struct Frame {
    /// Session sequence number, starting at 1
    pub sequence: u64,

    /// Wall-clock time at capture
    pub captured_at: SystemTime,

    /// Frame metadata reported by the device
    pub meta: FrameMetadata,

    /// Immutable RGB24 pixel data
    pub pixels: Bytes,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub device_frame_id: Option<u64>,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    /// Row stride of the RGB24 buffer in bytes
    pub fn stride(&self) -> usize {
        self.meta.width as usize * 3
    }
}

/// Buffer exactly as the camera delivered it, before conversion.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub device_frame_id: Option<u64>,
    pub device_timestamp: Option<Duration>,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv,
    Mjpeg,
    BayerRg8,
}

impl PixelFormat {
    /// Expected buffer length for an uncompressed frame, `None` for MJPEG.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Yuyv => Some(pixels * 2),
            PixelFormat::BayerRg8 => Some(pixels),
            PixelFormat::Mjpeg => None,
        }
    }
}

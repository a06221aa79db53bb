//! Frame source: numbering, stamping and converting what the camera delivers

use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{info, instrument, warn};

use super::camera::{Camera, CameraError};
use super::convert::{self, ConvertError};
use super::frame::{Frame, FrameMetadata};

#[derive(Debug, Error)]
pub enum CaptureError {
    /// No frame within the timeout; the caller retries
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    /// The device is gone or the driver failed; acquisition must stop
    #[error("camera failure: {0}")]
    Fatal(#[source] CameraError),
    /// The buffer arrived but could not be converted; the frame is skipped
    #[error("frame conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

/// Wraps a [`Camera`] and turns its raw buffers into numbered RGB24 frames.
///
/// The sequence counter lives as long as the source and is never reset, so
/// restarting streaming continues the numbering. Streaming is stopped when the
/// source is dropped, whatever path led there.
pub struct FrameSource<C: Camera> {
    camera: C,
    timeout: Duration,
    sequence: u64,
    streaming: bool,
    last_device_id: Option<u64>,
    driver_gaps: u64,
}

impl<C: Camera> FrameSource<C> {
    pub fn new(camera: C, timeout: Duration) -> Self {
        Self {
            camera,
            timeout,
            sequence: 0,
            streaming: false,
            last_device_id: None,
            driver_gaps: 0,
        }
    }

    pub fn camera_name(&self) -> &str {
        self.camera.name()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of frames handed out so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Frames the driver skipped, judged from device frame ids
    pub fn driver_gaps(&self) -> u64 {
        self.driver_gaps
    }

    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.streaming {
            return Ok(());
        }
        self.camera.start_streaming()?;
        self.streaming = true;
        info!(camera = self.camera.name(), "Streaming started");
        Ok(())
    }

    /// Stop streaming. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.camera.stop_streaming()?;
        info!(
            camera = self.camera.name(),
            frames = self.sequence,
            "Streaming stopped"
        );
        Ok(())
    }

    #[instrument(level = "trace", skip(self), fields(next = self.sequence + 1))]
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        let raw = match self.camera.capture(self.timeout) {
            Ok(raw) => raw,
            Err(CameraError::Timeout(waited)) => return Err(CaptureError::Timeout(waited)),
            Err(e) => return Err(CaptureError::Fatal(e)),
        };
        let captured_at = SystemTime::now();

        if let Some(id) = raw.device_frame_id {
            if let Some(last) = self.last_device_id {
                let skipped = id.saturating_sub(last).saturating_sub(1);
                if skipped > 0 {
                    self.driver_gaps += skipped;
                    warn!(last, id, skipped, "Device frame ids skipped, driver dropped frames");
                }
            }
            self.last_device_id = Some(id);
        }

        let pixels = convert::to_rgb24(&raw)?;

        self.sequence += 1;
        Ok(Frame {
            sequence: self.sequence,
            captured_at,
            meta: FrameMetadata {
                width: raw.width,
                height: raw.height,
                device_frame_id: raw.device_frame_id,
                device_timestamp: raw.device_timestamp,
            },
            pixels,
        })
    }
}

impl<C: Camera> Drop for FrameSource<C> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop streaming on release: {}", e);
        }
    }
}

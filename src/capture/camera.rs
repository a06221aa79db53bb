//! Camera seam: the only way the pipeline talks to hardware

use std::time::Duration;

use thiserror::Error;

use super::frame::RawFrame;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("device error: {0}")]
    Device(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CameraError::Timeout(_))
    }
}

/// A streaming camera.
///
/// Opening is the implementor's constructor and closing is `Drop`. The
/// pipeline calls `start_streaming` once, `capture` repeatedly from the
/// acquisition thread, and `stop_streaming` exactly once.
pub trait Camera: Send {
    /// Human readable device name for logs
    fn name(&self) -> &str;

    fn start_streaming(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame, the timeout, or a device failure.
    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CameraError>;

    fn stop_streaming(&mut self) -> Result<(), CameraError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start_streaming(&mut self) -> Result<(), CameraError> {
        (**self).start_streaming()
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CameraError> {
        (**self).capture(timeout)
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        (**self).stop_streaming()
    }
}

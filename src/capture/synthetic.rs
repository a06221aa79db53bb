//! Test-pattern camera for dry runs without hardware

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::capture::camera::{Camera, CameraError};
use crate::capture::frame::{PixelFormat, RawFrame};

/// Produces a scrolling RGB gradient at a fixed rate.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Option<Instant>,
    started: Option<Instant>,
    frame_id: u64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps),
            next_due: None,
            started: None,
            frame_id: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.frame_id as usize;
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift) * 255 / w.max(1)) as u8);
                data.push((y * 255 / h.max(1)) as u8);
                data.push((shift % 256) as u8);
            }
        }
        data
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start_streaming(&mut self) -> Result<(), CameraError> {
        let now = Instant::now();
        self.started = Some(now);
        self.next_due = Some(now + self.interval);
        debug!(interval = ?self.interval, "Synthetic stream started");
        Ok(())
    }

    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CameraError> {
        let (Some(due), Some(started)) = (self.next_due, self.started) else {
            return Err(CameraError::Device("stream not started".into()));
        };

        let wait = due.saturating_duration_since(Instant::now());
        if wait > timeout {
            thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }
        thread::sleep(wait);
        self.next_due = Some(due + self.interval);
        self.frame_id += 1;

        Ok(RawFrame {
            data: Bytes::from(self.render()),
            format: PixelFormat::Rgb24,
            width: self.width,
            height: self.height,
            device_frame_id: Some(self.frame_id),
            device_timestamp: Some(due - started),
        })
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        self.next_due = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_paced_and_numbered() {
        let mut camera = SyntheticCamera::new(8, 4, 200.0);
        camera.start_streaming().unwrap();

        let start = Instant::now();
        let a = camera.capture(Duration::from_secs(1)).unwrap();
        let b = camera.capture(Duration::from_secs(1)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(9));
        assert_eq!(a.data.len(), 8 * 4 * 3);
        assert_eq!((a.device_frame_id, b.device_frame_id), (Some(1), Some(2)));
    }

    #[test]
    fn capture_before_start_fails() {
        let mut camera = SyntheticCamera::new(8, 4, 30.0);
        assert!(matches!(
            camera.capture(Duration::from_millis(1)),
            Err(CameraError::Device(_))
        ));
    }

    #[test]
    fn slow_rate_times_out() {
        let mut camera = SyntheticCamera::new(8, 4, 1.0);
        camera.start_streaming().unwrap();
        assert!(camera.capture(Duration::from_millis(5)).unwrap_err().is_timeout());
    }
}

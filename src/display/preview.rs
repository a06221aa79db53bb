//! Best-effort preview: sampled, non-blocking handoff to the UI thread

use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::pipeline::shutdown::ShutdownReason;
use crate::pipeline::state::PipelineStats;
use crate::pipeline::Context;
use crate::Frame;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
#[error("preview failed: {0}")]
pub struct PreviewError(pub String);

impl From<image::ImageError> for PreviewError {
    fn from(e: image::ImageError) -> Self {
        PreviewError(e.to_string())
    }
}

/// Read-only view of a captured frame for display
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// Something that can put frames on a screen. Driven only from the thread
/// that owns the UI surface.
pub trait Preview {
    fn show(&mut self, frame: &PreviewFrame) -> Result<(), PreviewError>;

    /// Poll UI events; `true` once the user asked to stop recording
    fn stop_requested(&mut self) -> bool {
        false
    }

    /// Status line shown after capture ends
    fn status(&mut self, _text: &str) {}
}

/// Producer side of the preview, held by the acquisition loop.
pub struct PreviewTap {
    tx: Sender<PreviewFrame>,
    every: u64,
}

/// Create a tap offering every `sample_every`th frame and the receiver the UI
/// thread drains. The channel holds one frame; a busy UI means a skipped frame.
pub fn preview_channel(sample_every: u32) -> (PreviewTap, Receiver<PreviewFrame>) {
    let (tx, rx) = flume::bounded(1);
    (
        PreviewTap {
            tx,
            every: u64::from(sample_every.max(1)),
        },
        rx,
    )
}

impl PreviewTap {
    /// Hand the frame to the UI if it is sampled and the UI is free. Never blocks.
    pub fn offer(&self, frame: &Frame, stats: &PipelineStats) -> bool {
        if frame.sequence % self.every != 0 {
            return false;
        }
        if self.tx.is_full() {
            stats.preview_skipped();
            return false;
        }

        let view = PreviewFrame {
            sequence: frame.sequence,
            width: frame.meta.width,
            height: frame.meta.height,
            pixels: frame.pixels.clone(),
        };
        match self.tx.try_send(view) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                stats.preview_skipped();
                false
            }
        }
    }
}

/// Drive `preview` on the calling thread until the tap closes.
///
/// A stop request from the UI raises the shutdown signal. Render errors skip
/// the frame.
#[instrument(skip_all)]
pub fn run_preview<P: Preview + ?Sized>(
    preview: &mut P,
    rx: Receiver<PreviewFrame>,
    ctx: &Context,
) {
    info!("Preview running");
    loop {
        if preview.stop_requested() {
            ctx.shutdown.trigger(ShutdownReason::UserRequested);
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => match preview.show(&frame) {
                Ok(()) => ctx.stats.preview_shown(),
                Err(e) => {
                    warn!(sequence = frame.sequence, "{}", e);
                    ctx.stats.preview_skipped();
                }
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    preview.status("Capture complete, still writing to disk...");
    debug!("Preview stopped");
}

/// Headless preview that only reports frame numbers.
#[derive(Default)]
pub struct LogPreview {
    last: Option<u64>,
}

impl LogPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_shown(&self) -> Option<u64> {
        self.last
    }
}

impl Preview for LogPreview {
    fn show(&mut self, frame: &PreviewFrame) -> Result<(), PreviewError> {
        debug!("frame #: {}", frame.sequence);
        self.last = Some(frame.sequence);
        Ok(())
    }

    fn status(&mut self, text: &str) {
        info!("{}", text);
    }
}

/// Scale an RGB24 frame to `height`, keeping the aspect ratio.
pub fn scale_to_height(frame: &PreviewFrame, height: u32) -> Result<image::RgbImage, PreviewError> {
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels.to_vec())
        .ok_or_else(|| {
            PreviewError(format!(
                "{} bytes do not fit {}x{}",
                frame.pixels.len(),
                frame.width,
                frame.height
            ))
        })?;
    if height == 0 || height == frame.height {
        return Ok(image);
    }
    let width = (u64::from(frame.width) * u64::from(height) / u64::from(frame.height.max(1)))
        .max(1) as u32;
    Ok(image::imageops::resize(
        &image,
        width,
        height,
        image::imageops::FilterType::Triangle,
    ))
}

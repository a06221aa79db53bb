//! Acquisition loop: camera -> queue, owning the streaming lifecycle

use tracing::{error, info, instrument, warn};

use super::ledger::{FrameLedger, LedgerClock};
use super::queue::FrameSender;
use super::shutdown::ShutdownReason;
use super::state::PipelineState;
use super::Context;
use crate::capture::{Camera, CaptureError, FrameSource};
use crate::display::PreviewTap;

/// What the acquisition loop hands back when it exits
#[derive(Debug)]
pub struct AcquisitionReport {
    /// One entry per frame accepted into the queue, in capture order
    pub ledger: FrameLedger,
    /// Set when the loop ended because of a device failure
    pub fatal: Option<String>,
}

/// Capture until the shutdown signal is raised or the camera fails.
///
/// On the way out, in this order: streaming is stopped, the state moves to
/// Draining, and the queue is closed so the encoder can drain it.
#[instrument(skip_all, fields(camera = source.camera_name()))]
pub fn run_acquisition<C: Camera>(
    mut source: FrameSource<C>,
    mut queue: FrameSender,
    tap: Option<PreviewTap>,
    ctx: &Context,
) -> AcquisitionReport {
    let pipeline = &ctx.config.pipeline;
    let mut clock = LedgerClock::new(ctx.config.ledger.timestamp_source);
    let mut ledger = FrameLedger::new();
    let mut consecutive_timeouts = 0u32;

    let fatal = match source.start() {
        Err(e) => {
            error!("Failed to start streaming: {}", e);
            let msg = e.to_string();
            ctx.shutdown.trigger(ShutdownReason::DeviceFatal(msg.clone()));
            Some(msg)
        }
        Ok(()) => {
            ctx.state.advance(PipelineState::Streaming);
            info!(capacity = queue.capacity(), "Acquiring");

            loop {
                if ctx.shutdown.is_triggered() {
                    break None;
                }

                match source.capture() {
                    Ok(frame) => {
                        consecutive_timeouts = 0;
                        ctx.stats.frame_captured();

                        if let Some(tap) = &tap {
                            tap.offer(&frame, &ctx.stats);
                        }

                        let entry = clock.stamp(&frame);
                        if !queue.push(frame) {
                            error!(sequence = entry.sequence, "Frame queue consumer is gone");
                            ctx.shutdown.trigger(ShutdownReason::ConsumerLost);
                            break Some("frame queue consumer is gone".to_string());
                        }
                        ledger.push(entry);

                        if let Some(limit) = pipeline.max_frames {
                            if ledger.len() as u64 >= limit {
                                ctx.shutdown
                                    .trigger(ShutdownReason::FrameLimitReached(limit));
                            }
                        }
                    }
                    Err(CaptureError::Timeout(waited)) => {
                        consecutive_timeouts += 1;
                        ctx.stats.capture_timed_out();
                        warn!(
                            after = ?waited,
                            consecutive = consecutive_timeouts,
                            last_sequence = source.sequence(),
                            "No frame from camera"
                        );

                        if let Some(limit) = pipeline.max_consecutive_timeouts {
                            if consecutive_timeouts >= limit {
                                let msg = format!("{} consecutive capture timeouts", limit);
                                error!("{}", msg);
                                ctx.shutdown.trigger(ShutdownReason::DeviceFatal(msg.clone()));
                                break Some(msg);
                            }
                        }
                    }
                    Err(CaptureError::Convert(e)) => {
                        ctx.stats.capture_failed();
                        warn!("Skipping unreadable frame: {}", e);
                    }
                    Err(CaptureError::Fatal(e)) => {
                        error!("Camera failed: {}", e);
                        let msg = e.to_string();
                        ctx.shutdown.trigger(ShutdownReason::DeviceFatal(msg.clone()));
                        break Some(msg);
                    }
                }
            }
        }
    };

    if let Err(e) = source.stop() {
        warn!("Failed to stop streaming: {}", e);
    }
    ctx.stats.set_driver_gaps(source.driver_gaps());
    ctx.stats.add_backpressure_waits(queue.backpressure_waits());

    ctx.state.advance(PipelineState::Draining);
    info!(
        frames = ledger.len(),
        pending = queue.len(),
        "Capture complete, draining queue"
    );
    queue.close();

    AcquisitionReport { ledger, fatal }
}

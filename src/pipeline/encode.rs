//! Encode/save loop: queue -> encoder, draining everything before it finishes

use std::time::Instant;

use tracing::{error, info, instrument, warn};

use super::queue::{FrameReceiver, Popped};
use super::state::PipelineState;
use super::Context;
use crate::encoder::{EncodeError, VideoEncoder};

/// Write every queued frame until the queue is closed and empty, then finish
/// the encoder once and mark the pipeline stopped.
///
/// A failed write is counted and skipped; the next frame is still written.
#[instrument(skip_all)]
pub fn run_encoder<E: VideoEncoder>(
    queue: FrameReceiver,
    mut encoder: E,
    ctx: &Context,
) -> Result<(), EncodeError> {
    let mut draining_logged = false;

    loop {
        let frame = match queue.pop() {
            Popped::Frame(frame) => frame,
            Popped::Closed => break,
        };

        let write_start = Instant::now();
        match encoder.write_frame(&frame) {
            Ok(()) => {
                ctx.stats.frame_encoded();
                metrics::histogram!("encode_time_us")
                    .record(write_start.elapsed().as_micros() as f64);
            }
            Err(e) => {
                ctx.stats.encode_failed();
                warn!(sequence = frame.sequence, "Frame not written: {}", e);
            }
        }

        if !draining_logged && ctx.shutdown.is_triggered() {
            draining_logged = true;
            info!(pending = queue.len(), "Shutdown signalled, draining");
        }
    }

    let finished = encoder.finish();
    if let Err(e) = &finished {
        error!("Encoder did not finish cleanly: {}", e);
    }

    ctx.state.advance(PipelineState::Stopped);
    let stats = ctx.stats.snapshot();
    info!(
        written = stats.encoded,
        failed = stats.encode_failures,
        "Encoder stopped"
    );
    finished
}

//! Session: wires camera, queue, encoder, preview and ledger together

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use super::acquisition::run_acquisition;
use super::encode::run_encoder;
use super::ledger::{FrameLedger, LedgerError};
use super::queue::frame_queue;
use super::shutdown::{Shutdown, ShutdownReason};
use super::state::StatsSnapshot;
use super::Context;
use crate::capture::{Camera, FrameSource};
use crate::display::{preview_channel, run_preview, Preview};
use crate::encoder::{EncodeError, VideoEncoder};
use crate::Config;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, #[source] io::Error),
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// End-of-session accounting
#[derive(Debug)]
pub struct SessionReport {
    pub reason: Option<ShutdownReason>,
    pub stats: StatsSnapshot,
    /// Kept in memory even when persisting failed
    pub ledger: FrameLedger,
    pub ledger_path: PathBuf,
    pub ledger_error: Option<LedgerError>,
    pub encoder_error: Option<EncodeError>,
    pub capture_time: Duration,
    pub total_time: Duration,
}

impl SessionReport {
    pub fn frames(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_fatal(&self) -> bool {
        self.reason.as_ref().is_some_and(ShutdownReason::is_fatal)
    }

    /// Every ledger entry is either in the video or counted as dropped.
    pub fn is_consistent(&self) -> bool {
        self.stats.encoded + self.stats.dropped() == self.ledger.len() as u64
    }

    /// 0 on a clean stop, 2 when the ledger could not be written, 1 after a
    /// device failure.
    pub fn exit_code(&self) -> u8 {
        if self.ledger_error.is_some() {
            2
        } else if self.is_fatal() {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        let s = &self.stats;
        info!(
            "Capture ends at: {:.2}sec, file written at: {:.2}sec",
            self.capture_time.as_secs_f64(),
            self.total_time.as_secs_f64()
        );
        info!(
            frames = self.frames(),
            encoded = s.encoded,
            encode_failures = s.encode_failures,
            drain_dropped = s.drain_dropped,
            timeouts = s.capture_timeouts,
            capture_errors = s.capture_errors,
            driver_gaps = s.driver_gaps,
            backpressure_waits = s.backpressure_waits,
            preview_skipped = s.preview_skipped,
            "Acquisition complete, {} frames stored",
            s.encoded
        );
        for gap in self.ledger.gaps() {
            warn!(after = gap.after, missing = gap.missing, "Ledger gap");
        }
        if let Some(e) = &self.ledger_error {
            error!(
                frames = self.frames(),
                path = %self.ledger_path.display(),
                "Frame ledger NOT saved: {}",
                e
            );
        }
    }
}

/// One recording session. Owns the shared context for its lifetime.
pub struct Session {
    ctx: Arc<Context>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            ctx: Arc::new(Context::new(config)),
        }
    }

    /// Handle for stopping the session from elsewhere (signal handler, UI)
    pub fn shutdown(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Record until shutdown, then drain, finish the encoder and persist the
    /// ledger to `ledger_path`.
    ///
    /// `preview`, if given, is driven on the calling thread.
    pub fn run<C, E, P>(
        &self,
        camera: C,
        encoder: E,
        preview: Option<&mut P>,
        ledger_path: &Path,
    ) -> Result<SessionReport, SessionError>
    where
        C: Camera + 'static,
        E: VideoEncoder + 'static,
        P: Preview + ?Sized,
    {
        let config = &self.ctx.config;
        let started = Instant::now();

        let source = FrameSource::new(camera, config.camera.capture_timeout());
        let (tx, rx) = frame_queue(config.pipeline.queue_capacity);

        let (tap, preview) = match preview {
            Some(preview) if config.display.enabled => {
                let (tap, preview_rx) = preview_channel(config.display.sample_every);
                (Some(tap), Some((preview, preview_rx)))
            }
            _ => (None, None),
        };

        let ctx = self.ctx.clone();
        let encode = thread::Builder::new()
            .name("encode".into())
            .spawn(move || run_encoder(rx, encoder, &ctx))
            .map_err(|e| SessionError::Spawn("encode", e))?;

        let ctx = self.ctx.clone();
        let core = config.pipeline.acquisition_core;
        let acquisition = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_core(core);
                }
                let report = run_acquisition(source, tx, tap, &ctx);
                (report, Instant::now())
            });
        let acquisition = match acquisition {
            Ok(handle) => handle,
            Err(e) => {
                // The sender died with the closure, so the encoder drains and exits
                let _ = encode.join();
                return Err(SessionError::Spawn("acquisition", e));
            }
        };

        if let Some((preview, preview_rx)) = preview {
            run_preview(preview, preview_rx, &self.ctx);
        }

        let acquired = acquisition.join();
        let encoded = encode.join();

        let (report, capture_end) = match acquired {
            Ok(acquired) => acquired,
            Err(_) => {
                let stats = self.ctx.stats.snapshot();
                error!(
                    captured = stats.captured,
                    encoded = stats.encoded,
                    path = %ledger_path.display(),
                    "Acquisition thread panicked, frame ledger NOT saved"
                );
                return Err(SessionError::Panicked("acquisition"));
            }
        };
        let encoder_error = match encoded {
            Ok(finished) => finished.err(),
            Err(_) => {
                error!("Encode thread panicked");
                Some(EncodeError::Rejected("encode thread panicked".into()))
            }
        };

        let ledger = report.ledger;
        self.reconcile(&ledger);

        let ledger_error = persist_with_retry(&ledger, ledger_path, config).err();

        Ok(SessionReport {
            reason: self.ctx.shutdown.reason(),
            stats: self.ctx.stats.snapshot(),
            ledger,
            ledger_path: ledger_path.to_path_buf(),
            ledger_error,
            encoder_error,
            capture_time: capture_end.duration_since(started),
            total_time: started.elapsed(),
        })
    }

    /// Count ledger entries that neither reached the encoder nor failed there.
    fn reconcile(&self, ledger: &FrameLedger) {
        let stats = self.ctx.stats.snapshot();
        let accounted = stats.encoded + stats.encode_failures + stats.drain_dropped;
        let unaccounted = (ledger.len() as u64).saturating_sub(accounted);
        if unaccounted > 0 {
            error!(unaccounted, "Frames were dropped while draining");
            self.ctx.stats.dropped_while_draining(unaccounted);
        }
    }
}

fn persist_with_retry(
    ledger: &FrameLedger,
    path: &Path,
    config: &Config,
) -> Result<(), LedgerError> {
    let mode = config.ledger.timestamp_mode;
    retry_once(|| ledger.persist(path, mode))
}

/// Run `write`, and once more if it failed for any reason other than the
/// target already existing.
fn retry_once<F>(mut write: F) -> Result<(), LedgerError>
where
    F: FnMut() -> Result<(), LedgerError>,
{
    match write() {
        Err(LedgerError::Exists(p)) => Err(LedgerError::Exists(p)),
        Err(e) => {
            warn!("Ledger write failed, retrying: {}", e);
            write()
        }
        ok => ok,
    }
}

fn pin_to_core(core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
        .is_some_and(core_affinity::set_for_current);
    if pinned {
        info!(core, "Acquisition thread pinned");
    } else {
        warn!(core, "Could not pin acquisition thread");
    }
}

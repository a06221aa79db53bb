pub mod acquisition;
pub mod encode;
pub mod ledger;
pub mod queue;
pub mod session;
pub mod shutdown;
pub mod state;

use crate::Config;

pub use acquisition::{run_acquisition, AcquisitionReport};
pub use encode::run_encoder;
pub use ledger::{FrameLedger, LedgerClock};
pub use queue::{frame_queue, FrameReceiver, FrameSender, Popped};
pub use shutdown::{Shutdown, ShutdownReason};
pub use state::{PipelineState, PipelineStats, StateCell, StatsSnapshot};

/// Everything the loops of one session share. Created at session start and
/// dropped once the session has stopped.
pub struct Context {
    pub config: Config,
    pub stats: PipelineStats,
    pub state: StateCell,
    pub shutdown: Shutdown,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self::with_shutdown(config, Shutdown::new())
    }

    pub fn with_shutdown(config: Config, shutdown: Shutdown) -> Self {
        Self {
            config,
            stats: PipelineStats::default(),
            state: StateCell::new(),
            shutdown,
        }
    }
}

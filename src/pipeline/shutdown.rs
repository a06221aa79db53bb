//! Session-wide cancellation signal

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Why the session is stopping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Key press, window close or interrupt signal
    UserRequested,
    /// The configured trigger count has been captured
    FrameLimitReached(u64),
    /// The camera failed and acquisition cannot continue
    DeviceFatal(String),
    /// The encode side disappeared while frames were still being produced
    ConsumerLost,
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShutdownReason::DeviceFatal(_) | ShutdownReason::ConsumerLost
        )
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserRequested => write!(f, "stop requested"),
            ShutdownReason::FrameLimitReached(n) => write!(f, "frame limit of {} reached", n),
            ShutdownReason::DeviceFatal(e) => write!(f, "camera failure: {}", e),
            ShutdownReason::ConsumerLost => write!(f, "encoder stopped consuming frames"),
        }
    }
}

/// Cloneable handle to the one shutdown signal of a session.
///
/// The first `trigger` wins and records its reason; later calls change
/// nothing. Blocking loops poll `is_triggered`, async tasks `wait`.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let label = reason.to_string();
        let first = self.tx.send_if_modified(move |current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });

        if first {
            info!("Shutdown: {}", label);
        } else {
            debug!("Shutdown already in progress, ignoring: {}", label);
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.tx.borrow().clone()
    }

    /// Resolve once the signal has been raised.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            // The sender lives in `self`, so the channel cannot close under us
            if rx.changed().await.is_err() {
                return ShutdownReason::ConsumerLost;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

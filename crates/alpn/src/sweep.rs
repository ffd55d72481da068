//! Background challenge expiry sweeping
//!
//! Lookups evict expired challenges lazily, but a domain no validator
//! revisits would otherwise linger until the orchestrator disarms it. The
//! sweeper runs as an independent task and keeps the registry bounded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{info, trace};

use crate::registry::ChallengeRegistry;

/// Default sweep interval
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum sweep interval
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically removes expired challenges from a registry
///
/// Each pass is a single [`ChallengeRegistry::sweep`] call; no lock is
/// held beyond the map mutation, so handshakes are never stalled by the
/// sweeper.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Registry to sweep
    registry: Arc<ChallengeRegistry>,
    /// Time between sweep passes
    sweep_interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper for `registry` with the default interval
    pub fn new(registry: Arc<ChallengeRegistry>) -> Self {
        Self {
            registry,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the sweep interval
    ///
    /// The interval is clamped to a minimum of one second to avoid busy
    /// sweeping.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Run the sweep loop
    ///
    /// Runs until the owning task is dropped or aborted.
    pub async fn run(self) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "Starting challenge expiry sweeper"
        );

        let mut ticker = interval(self.sweep_interval);

        loop {
            ticker.tick().await;
            trace!("Running challenge expiry sweep");
            self.registry.sweep(Instant::now());
        }
    }
}

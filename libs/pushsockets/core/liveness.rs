//! Inbound liveness tracker
//!
//! Records when the broker last sent anything (a frame or a bare heart-beat)
//! so the heart-beat watchdog can detect half-open connections. A connection
//! is unhealthy once the silence since the last inbound data exceeds the
//! configured limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks inbound traffic to detect dead connections
///
/// Timestamps are stored as milliseconds since an internal epoch so they fit
/// in an atomic and can be read from any task.
pub struct LivenessTracker {
    /// Epoch time when tracking started (for converting Instant to u64)
    epoch: Instant,
    /// Last inbound data (ms since epoch)
    last_inbound_ms: AtomicU64,
    /// Silence tolerated before the connection is considered dead
    limit: Duration,
}

impl LivenessTracker {
    /// Create a tracker; the clock starts now, as if data had just arrived
    pub fn new(limit: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_inbound_ms: AtomicU64::new(0),
            limit,
        }
    }

    /// Record that data was just received
    pub fn record_inbound(&self) {
        self.last_inbound_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Time since the last inbound data
    pub fn silence(&self) -> Duration {
        let last = self.last_inbound_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Check if the connection appears healthy
    pub fn is_healthy(&self) -> bool {
        self.silence() <= self.limit
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

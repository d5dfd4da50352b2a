//! Heart-beat negotiation and timers for STOMP connections
//!
//! # Architecture
//!
//! Both directions are driven from the transport's I/O loop through two
//! tokio intervals that are polled inside its `select!`:
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Transport I/O loop      │
//! │                          │
//! │  outgoing tick ──────────┼──> write EOL to the channel
//! │  watchdog tick ──────────┼──> LivenessTracker::is_healthy()?
//! │                          │        └─ no: report TransportError, stop
//! │  inbound bytes ──────────┼──> LivenessTracker::record_inbound()
//! └──────────────────────────┘
//! ```
//!
//! # Negotiation
//!
//! The client offers `heart-beat:cx,cy` in CONNECT and the broker answers
//! `heart-beat:sx,sy` in CONNECTED. Each direction is enabled only when both
//! sides are non-zero, and runs at the slower of the two rates:
//!
//! - outgoing = max(cx, sy)
//! - incoming = max(cy, sx)
//!
//! # Detection latency
//!
//! The watchdog ticks once per incoming interval and tolerates silence up to
//! `incoming x HEARTBEAT_GRACE_FACTOR`, so a half-open connection is reported
//! between two and three incoming intervals after the last inbound byte.

use std::future::pending;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Multiple of the incoming interval we tolerate before declaring the peer dead
pub const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Negotiated heart-beat rates; `None` disables a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatSchedule {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl HeartbeatSchedule {
    /// Combine the client offer with the broker's `(sx, sy)` answer
    pub fn negotiate(client_outgoing: Duration, client_incoming: Duration, server: (u64, u64)) -> Self {
        let (server_outgoing, server_incoming) = server;
        Self {
            outgoing: combine(client_outgoing.as_millis() as u64, server_incoming),
            incoming: combine(client_incoming.as_millis() as u64, server_outgoing),
        }
    }

    /// Longest silence tolerated before the connection is considered half-open
    pub fn silence_limit(&self) -> Option<Duration> {
        self.incoming.map(|ttl| ttl * HEARTBEAT_GRACE_FACTOR)
    }

    pub fn is_disabled(&self) -> bool {
        self.outgoing.is_none() && self.incoming.is_none()
    }
}

fn combine(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

/// A periodic timer that may be switched off
pub struct Ticker(Option<Interval>);

impl Ticker {
    pub fn off() -> Self {
        Self(None)
    }

    /// The first tick is one full period away rather than immediate
    pub fn every(period: Duration) -> Self {
        Self(Some(ticker(period)))
    }

    pub fn is_off(&self) -> bool {
        self.0.is_none()
    }

    /// Resolves on the next tick; never resolves when off
    pub async fn tick(&mut self) {
        match self.0.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }
}

/// Running heart-beat timers for one connection
///
/// The two directions are separate fields so an I/O loop can poll both from
/// one `select!`.
pub struct Heartbeat {
    schedule: HeartbeatSchedule,
    /// Fires when the next keep-alive should be written
    pub outgoing: Ticker,
    /// Fires when inbound liveness should be checked
    pub watchdog: Ticker,
}

impl Heartbeat {
    /// Timers that never fire; used until CONNECTED has been negotiated
    pub fn disabled() -> Self {
        Self {
            schedule: HeartbeatSchedule::default(),
            outgoing: Ticker::off(),
            watchdog: Ticker::off(),
        }
    }

    /// Start timers for a negotiated schedule
    pub fn start(schedule: HeartbeatSchedule) -> Self {
        debug!(
            "[Heartbeat] Negotiated outgoing={:?} incoming={:?}",
            schedule.outgoing, schedule.incoming
        );
        Self {
            schedule,
            outgoing: schedule.outgoing.map_or_else(Ticker::off, Ticker::every),
            watchdog: schedule.incoming.map_or_else(Ticker::off, Ticker::every),
        }
    }

    pub fn schedule(&self) -> HeartbeatSchedule {
        self.schedule
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    // If we miss ticks due to slow processing, skip them rather than bursting
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

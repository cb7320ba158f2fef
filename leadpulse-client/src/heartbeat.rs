//! Keep-alive heartbeat
//!
//! The backend hibernates any connection silent for 10 seconds, so
//! bidirectional transports ping well under that: once immediately after
//! connect, then on a fixed interval.

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};

/// Fixed-interval ping schedule for one connection
#[derive(Debug)]
pub(crate) struct Heartbeat {
    ticker: Interval,
}

impl Heartbeat {
    pub(crate) fn new(period: Duration) -> Self {
        let mut ticker = time::interval(period);
        // A missed tick (event loop stalled, machine suspended) must not
        // burst a backlog of pings afterwards.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { ticker }
    }

    /// Completes when the next ping is due. The first call completes
    /// immediately.
    pub(crate) async fn tick(&mut self) {
        self.ticker.tick().await;
    }
}

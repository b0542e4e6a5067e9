use instant::Instant;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Frame boundary source for hosts that do not deliver a vsync callback.
///
/// Ticks that were missed because a frame ran long are skipped rather than
/// replayed in a burst.
#[derive(Debug)]
pub struct FrameTicker {
    interval: Interval,
    period: Duration,
    ticks: u64,
}

impl FrameTicker {
    /// Must be created inside a tokio runtime
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            period,
            ticks: 0,
        }
    }

    /// Wait for the next boundary and return its time
    pub async fn tick(&mut self) -> Instant {
        let at = self.interval.tick().await;
        self.ticks += 1;
        at.into_std()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

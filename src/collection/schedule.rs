// =============================================================================
// Fixed-Grid Tick Schedule
// =============================================================================
//
// Tick n targets `start + n * interval`, independent of how long earlier
// fetches took, so timing error never accumulates. A late loop is reported
// but never skips ticks and never re-anchors the grid to the wall clock.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TickSchedule {
    start: Instant,
    interval: Duration,
    tick: u32,
}

impl TickSchedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            tick: 0,
        }
    }

    /// Index of the tick about to run.
    pub fn tick_index(&self) -> u32 {
        self.tick
    }

    /// Target instant of tick `n`.
    pub fn target(&self, n: u32) -> Instant {
        self.start + self.interval * n
    }

    pub fn next_target(&self) -> Instant {
        self.target(self.tick)
    }

    /// How long to sleep before the next tick; zero when already late.
    pub fn delay(&self, now: Instant) -> Duration {
        self.next_target().saturating_duration_since(now)
    }

    /// How far `now` is past the next target; zero when early.
    pub fn lag(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.next_target())
    }

    /// More than one full interval behind the grid.
    pub fn is_behind(&self, now: Instant) -> bool {
        self.lag(now) > self.interval
    }

    pub fn advance(&mut self) {
        self.tick += 1;
    }
}

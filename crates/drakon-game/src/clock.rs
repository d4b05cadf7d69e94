// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Wall-clock delta between loop iterations.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    /// Starts measuring now, so the first tick is close to zero.
    pub fn start() -> Self {
        FrameClock {
            last: Instant::now(),
        }
    }

    /// Seconds since the previous tick (or since `start`).
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f64 {
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        delta.as_secs_f64()
    }

    pub fn since_last(&self) -> Duration {
        self.last.elapsed()
    }
}

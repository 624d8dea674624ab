//! Fixed-rate tick timer.
//!
//! A tick that runs late is not made up for: the next deadline is scheduled one period after
//! whichever is later, the missed deadline or the moment the late tick started.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep until each deadline.
    Realtime,
    /// Never sleep; every tick reports exactly one period. For deterministic headless runs.
    Unpaced,
}

#[derive(Debug)]
pub struct FixedTicker {
    period: Duration,
    pacing: Pacing,
    deadline: Option<Instant>,
    last: Option<Instant>,
}

impl FixedTicker {
    pub fn new(period: Duration, pacing: Pacing) -> Self {
        Self {
            period,
            pacing,
            deadline: None,
            last: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Block until the next tick is due and return the time since the previous tick.
    /// The first tick is due immediately and reports one period.
    pub fn wait(&mut self) -> Duration {
        if self.pacing == Pacing::Unpaced {
            return self.period;
        }

        let now = Instant::now();
        let deadline = self.deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }

        let started = Instant::now();
        let dt = self.last.map_or(self.period, |last| started - last);
        if started > deadline + self.period {
            tracing::debug!(late = ?(started - deadline), "tick running late");
        }
        self.last = Some(started);
        self.deadline = Some(next_deadline(deadline, started, self.period));
        dt
    }
}

/// Deadline after a tick that was due at `deadline` and started at `started`.
pub fn next_deadline(deadline: Instant, started: Instant, period: Duration) -> Instant {
    deadline.max(started) + period
}

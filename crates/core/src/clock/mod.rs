use std::time::{Duration, Instant};

/// Source of session time in milliseconds. Implementations must be monotonic.
pub trait Clock {
    fn now_ms(&self) -> f64;

    /// Moves the session origin so that `now_ms()` reads `time_ms` right now.
    fn rebase(&mut self, time_ms: f64);
}

/// Wall-clock independent clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    offset_ms: f64,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self::starting_at(0.0)
    }

    /// Starts a clock that reads `offset_ms` at creation time.
    pub fn starting_at(offset_ms: f64) -> Self {
        Self {
            origin: Instant::now(),
            offset_ms,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.offset_ms + self.elapsed().as_secs_f64() * 1000.0
    }

    fn rebase(&mut self, time_ms: f64) {
        self.origin = Instant::now();
        self.offset_ms = time_ms;
    }
}

/// Clock advanced explicitly by the caller. Used for replays and tests.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    time_ms: f64,
}

impl ManualClock {
    pub fn new(time_ms: f64) -> Self {
        Self { time_ms }
    }

    pub fn set(&mut self, time_ms: f64) {
        self.time_ms = self.time_ms.max(time_ms);
    }

    pub fn advance(&mut self, delta_ms: f64) {
        self.time_ms += delta_ms.max(0.0);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.time_ms
    }

    fn rebase(&mut self, time_ms: f64) {
        self.time_ms = time_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_starts_at_offset() {
        let clock = MonotonicClock::starting_at(1500.0);
        let now = clock.now_ms();
        assert!(now >= 1500.0);
        assert!(clock.now_ms() >= now);
    }

    #[test]
    fn manual_clock_never_runs_backwards() {
        let mut clock = ManualClock::new(100.0);
        clock.advance(-50.0);
        assert_eq!(clock.now_ms(), 100.0);
        clock.set(40.0);
        assert_eq!(clock.now_ms(), 100.0);
        clock.set(160.0);
        assert_eq!(clock.now_ms(), 160.0);
    }
}

//! Monotonic and wall-clock time with adjustment detection.
//!
//! The loop stamps events with monotonic time and converts to wall-clock at
//! send. When the wall clock jumps relative to the monotonic clock (NTP
//! step, RTC battery change), the next request carries `Clock-Adjusted: 1`
//! so the service can re-anchor earlier timestamps.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use printlink_types::Timestamp;

/// Time source for the loop.
///
/// Injected so tests can step the wall clock without sleeping.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn monotonic(&self) -> Duration;

    /// Wall-clock time since the Unix epoch.
    fn wall(&self) -> Duration;

    /// Wall-clock seconds, convenience for wire timestamps.
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.wall().as_secs() as i64)
    }
}

/// Production clock: `Instant` + `SystemTime`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Manually stepped clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(Duration, Duration)>,
}

impl ManualClock {
    /// Starts at monotonic zero and the given wall time.
    pub fn new(wall: Duration) -> Self {
        Self {
            state: Mutex::new((Duration::ZERO, wall)),
        }
    }

    /// Advances both clocks together (normal passage of time).
    pub fn tick(&self, by: Duration) {
        let mut state = self.state.lock().expect("clock lock poisoned");
        state.0 += by;
        state.1 += by;
    }

    /// Steps only the wall clock (an adjustment).
    pub fn step_wall(&self, by: Duration) {
        self.state.lock().expect("clock lock poisoned").1 += by;
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        self.state.lock().expect("clock lock poisoned").0
    }

    fn wall(&self) -> Duration {
        self.state.lock().expect("clock lock poisoned").1
    }
}

/// Detects wall-clock jumps between observations.
///
/// A jump is declared when the wall clock and the monotonic clock disagree
/// about the elapsed time by more than [`SKEW_THRESHOLD`].
#[derive(Debug, Default)]
pub struct SkewDetector {
    last: Option<(Duration, Duration)>,
}

/// Disagreement above this is a clock adjustment.
pub const SKEW_THRESHOLD: Duration = Duration::from_secs(1);

impl SkewDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes the current clocks; true when the wall clock jumped since
    /// the previous observation.
    pub fn observe(&mut self, clock: &dyn Clock) -> bool {
        let mono = clock.monotonic();
        let wall = clock.wall();
        let adjusted = match self.last {
            Some((last_mono, last_wall)) => {
                let mono_delta = mono.saturating_sub(last_mono);
                let wall_delta = if wall >= last_wall {
                    wall - last_wall
                } else {
                    // Wall clock went backwards; that is always a jump.
                    self.last = Some((mono, wall));
                    return true;
                };
                let skew = if wall_delta > mono_delta {
                    wall_delta - mono_delta
                } else {
                    mono_delta - wall_delta
                };
                skew > SKEW_THRESHOLD
            }
            None => false,
        };
        self.last = Some((mono, wall));
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
        assert!(clock.now().as_secs() > 1_577_836_800);
    }

    #[test]
    fn no_skew_without_adjustment() {
        let clock = ManualClock::new(Duration::from_secs(1_700_000_000));
        let mut detector = SkewDetector::new();
        assert!(!detector.observe(&clock));
        clock.tick(Duration::from_secs(10));
        assert!(!detector.observe(&clock));
    }

    #[test]
    fn forward_jump_is_detected_once() {
        let clock = ManualClock::new(Duration::from_secs(1_700_000_000));
        let mut detector = SkewDetector::new();
        detector.observe(&clock);

        clock.step_wall(Duration::from_secs(3600));
        assert!(detector.observe(&clock), "jump must be flagged");
        clock.tick(Duration::from_secs(1));
        assert!(!detector.observe(&clock), "flag must clear after one report");
    }

    #[test]
    fn backward_jump_is_detected() {
        let clock = ManualClock::new(Duration::from_secs(1_700_000_000));
        let mut detector = SkewDetector::new();
        detector.observe(&clock);

        // Rewind: new wall < old wall.
        let rewound = ManualClock::new(Duration::from_secs(1_699_000_000));
        assert!(detector.observe(&rewound));
    }

    #[test]
    fn sub_second_drift_is_tolerated() {
        let clock = ManualClock::new(Duration::from_secs(1_700_000_000));
        let mut detector = SkewDetector::new();
        detector.observe(&clock);
        clock.tick(Duration::from_secs(5));
        clock.step_wall(Duration::from_millis(500));
        assert!(!detector.observe(&clock));
    }
}

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::ThreadRng;
use rand::Rng;

/// Decides the pause taken before each driver control operation.
///
/// This is the fault-injection knob of the capture session: a provider is
/// handed to the session by the caller, so there is no process-wide
/// randomness state. The pauses only stretch the timing between
/// operations; they never change their order.
pub trait Delay {
    /// The pause to take before the next operation.
    fn next(&mut self) -> Duration;
}

/// Never pauses. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn next(&mut self) -> Duration {
        Duration::ZERO
    }
}

/// Uniformly random pause, for shaking out timing-sensitive driver bugs.
pub struct Jitter<R: Rng = ThreadRng> {
    micros: RangeInclusive<u64>,
    rng: R,
}

impl Jitter {
    /// Pauses between 10ms and 1s before every operation.
    pub fn new() -> Self {
        Self::with_range(10_000..=1_000_000)
    }

    /// Pauses within the given microsecond range.
    pub fn with_range(micros: RangeInclusive<u64>) -> Self {
        Jitter {
            micros,
            rng: rand::thread_rng(),
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Delay for Jitter<R> {
    fn next(&mut self) -> Duration {
        Duration::from_micros(self.rng.gen_range(self.micros.clone()))
    }
}

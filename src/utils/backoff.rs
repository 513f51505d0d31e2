use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive random jitter, capped at `delay_max`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    delay_max: Duration,
    delay_current: Duration,
    factor: f64,
    jitter_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(delay_initial: Duration, delay_max: Duration, factor: f64, jitter_ms: u64) -> Self {
        Self {
            delay_max,
            delay_current: delay_initial,
            factor,
            jitter_ms,
        }
    }

    /// Returns the next delay (current base plus jitter) and grows the base.
    pub fn next_duration(&mut self) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        let delay = self
            .delay_current
            .saturating_add(Duration::from_millis(jitter));

        let next = Duration::try_from_secs_f64(self.delay_current.as_secs_f64() * self.factor)
            .unwrap_or(self.delay_max);
        self.delay_current = next.min(self.delay_max);

        delay
    }
}

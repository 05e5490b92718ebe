//! Exponential backoff with jitter for supervised reconnect loops

use rand::Rng;
use std::time::Duration;

const MIN_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Growth factor applied after every attempt
    pub multiplier: f64,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Backoff schedule for a loop that retries forever.
///
/// Unlike a bounded retry helper, the caller owns the loop: it asks for
/// `next_delay()` after each failure and calls `reset()` once the operation
/// succeeds, so a long healthy period starts the next outage from `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// A zero `initial` delay is raised to 1ms so the schedule can grow.
    pub fn new(mut config: BackoffConfig) -> Self {
        config.initial = config.initial.max(MIN_DELAY);
        config.max = config.max.max(config.initial);
        let current = config.initial;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let delay = apply_jitter(self.current, self.config.jitter).min(self.config.max);

        let grown = self.current.as_millis() as f64 * self.config.multiplier;
        self.current = Duration::from_millis(grown.min(self.config.max.as_millis() as f64) as u64);

        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.attempt = 0;
    }
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if !jitter {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64) -> Backoff {
        Backoff::new(BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter: false,
        })
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let mut backoff = fixed(100, 10_000);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_delays_are_capped() {
        let mut backoff = fixed(100, 250);

        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_initial_delay_still_grows() {
        let mut backoff = fixed(0, 10);

        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 10].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = fixed(100, 10_000);
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: true,
        });

        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(700), "delay too short: {:?}", delay);
            assert!(delay <= Duration::from_millis(1300), "delay too long: {:?}", delay);
        }
    }
}

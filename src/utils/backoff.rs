//! Per-loop exponential backoff with jitter.
//!
//! Each loop owns one `Backoff`; `next()` on consecutive failures,
//! `reset()` on the first success.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff: doubles from `min` up to `max`, each returned delay
/// multiplied by a uniform jitter in [0.75, 1.25).
#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    cur: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, cur: min }
    }

    pub fn reset(&mut self) {
        self.cur = self.min;
    }

    /// Next delay to sleep. Advances the internal state.
    pub fn next(&mut self) -> Duration {
        let d = self.cur;
        if self.cur < self.max {
            self.cur = (self.cur * 2).min(self.max);
        }
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        d.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_and_caps() {
        let mut bo = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let mut expected = Duration::from_secs(1);
        for _ in 0..10 {
            let d = bo.next();
            assert!(d >= expected.mul_f64(0.75), "delay {d:?} below jitter floor");
            assert!(d < expected.mul_f64(1.25), "delay {d:?} above jitter ceiling");
            expected = (expected * 2).min(Duration::from_secs(60));
        }
        // Saturated at the cap
        let d = bo.next();
        assert!(d >= Duration::from_secs(45) && d < Duration::from_secs(75));
    }

    #[test]
    fn reset_returns_to_min() {
        let mut bo = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..5 {
            bo.next();
        }
        bo.reset();
        let d = bo.next();
        assert!(d < Duration::from_millis(1250));
    }

    #[test]
    fn min_equal_max_is_stable() {
        let mut bo = Backoff::new(Duration::from_secs(2), Duration::from_secs(2));
        for _ in 0..4 {
            let d = bo.next();
            assert!(d >= Duration::from_millis(1500) && d < Duration::from_millis(2500));
        }
    }
}

//! Reconnect delay policy.

use std::time::Duration;

/// Exponential backoff with proportional jitter and a bounded retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, before jitter.
    pub initial_delay: Duration,
    /// Ceiling for the nominal delay.
    pub max_delay: Duration,
    /// Consecutive failures after which retries stop.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 20,
        }
    }
}

impl ReconnectPolicy {
    /// `min(initial * 2^attempt, max)`
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        // 2^20 already dwarfs any sane ceiling; clamping keeps the shift defined.
        let factor = 1u32 << attempt.min(20);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Nominal delay scaled into `[0.5, 1.0]` of itself by `unit` in `[0, 1]`.
    pub fn jittered_delay(&self, attempt: u32, unit: f64) -> Duration {
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.nominal_delay(attempt).mul_f64(0.5 + unit * 0.5)
    }
}

/// Source of the uniform draw used for jitter.
pub trait JitterSource: Send + 'static {
    /// A value in `[0, 1)`.
    fn sample(&mut self) -> f64;
}

/// Thread-local RNG jitter; the production source.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&mut self) -> f64 {
        rand::random::<f64>()
    }
}

/// Always returns the same draw. Makes delays exact in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let expected_ms = [1000, 2000, 4000, 8000, 16_000, 30_000, 30_000];
        for (attempt, ms) in expected_ms.iter().enumerate() {
            assert_eq!(
                policy.nominal_delay(attempt as u32),
                Duration::from_millis(*ms),
                "attempt {attempt}"
            );
        }
        assert_eq!(policy.nominal_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_bounds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.jittered_delay(0, 0.0), Duration::from_millis(500));
        assert_eq!(policy.jittered_delay(0, 1.0), Duration::from_millis(1000));
        assert_eq!(policy.jittered_delay(2, 0.5), Duration::from_millis(3000));
        assert_eq!(policy.jittered_delay(10, 0.0), Duration::from_millis(15_000));
    }

    #[test]
    fn out_of_range_draws_are_clamped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.jittered_delay(1, -3.0), Duration::from_millis(1000));
        assert_eq!(policy.jittered_delay(1, 7.0), Duration::from_millis(2000));
        assert_eq!(policy.jittered_delay(1, f64::NAN), Duration::from_millis(2000));
    }

    #[test]
    fn random_jitter_is_unit_interval() {
        let mut jitter = RandomJitter;
        for _ in 0..1000 {
            let draw = jitter.sample();
            assert!((0.0..1.0).contains(&draw));
        }
    }
}

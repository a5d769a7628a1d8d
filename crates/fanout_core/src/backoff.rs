//! Exponential backoff with jitter and load-adaptive stretching.
//!
//! The policy holds no per-call state: callers pass the attempt number and
//! their own load signal on every call.

use std::time::Duration;

use rand::Rng;

use crate::config::DispatchConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub jitter_max_ms: u64,
    pub overload_threshold: usize,
    pub overload_multiplier: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            max_ms: config.max_backoff_ms,
            jitter_max_ms: config.jitter_max_ms,
            overload_threshold: config.overload_threshold,
            overload_multiplier: config.overload_multiplier,
        }
    }

    /// `min(initial * 2^attempt, max)`, without jitter or load scaling.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_ms.saturating_mul(factor).min(self.max_ms))
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    pub fn next_delay<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        local_load: usize,
        rng: &mut R,
    ) -> Duration {
        let jitter_ms = if self.jitter_max_ms == 0 {
            0.0
        } else {
            rng.gen_range(0.0..self.jitter_max_ms as f64)
        };

        let mut delay_ms = self.base_delay(attempt).as_millis() as f64 + jitter_ms;
        if self.is_overloaded(local_load) {
            delay_ms *= self.overload_multiplier;
        }
        Duration::from_nanos((delay_ms * 1_000_000.0).round() as u64)
    }

    pub fn is_overloaded(&self, local_load: usize) -> bool {
        local_load > self.overload_threshold
    }

    /// Upper bound of any delay returned for an unloaded caller.
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.max_ms.saturating_add(self.jitter_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::from_config(&DispatchConfig::default())
    }

    #[test]
    fn base_delay_doubles_until_cap() {
        let policy = policy();
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(5), Duration::from_millis(3_200));
        assert_eq!(policy.base_delay(6), Duration::from_millis(5_000));
        assert_eq!(policy.base_delay(200), Duration::from_millis(5_000));
    }

    #[test]
    fn base_delay_is_non_decreasing_and_capped() {
        let policy = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..80 {
            let delay = policy.base_delay(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(policy.max_ms));
            previous = delay;
        }
    }

    #[test]
    fn jittered_delay_never_exceeds_ceiling_without_load() {
        let policy = policy();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..40 {
            let delay = policy.next_delay(attempt, 0, &mut rng);
            assert!(delay >= policy.base_delay(attempt));
            assert!(delay <= policy.ceiling());
        }
    }

    #[test]
    fn overload_stretches_delay() {
        let policy = policy();
        let mut rng = StepRng::new(0, 0);
        let calm = policy.next_delay(1, policy.overload_threshold, &mut rng);
        let loaded = policy.next_delay(1, policy.overload_threshold + 1, &mut rng);

        assert_eq!(calm, Duration::from_millis(200));
        assert_eq!(loaded, Duration::from_millis(300));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            jitter_max_ms: 0,
            ..policy()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.next_delay(2, 0, &mut rng), Duration::from_millis(400));
    }
}

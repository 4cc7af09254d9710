use std::time::Duration;
use tokio_retry2::strategy::{ExponentialFactorBackoff, jitter};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Delay schedule between failed fetch attempts within one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_BACKOFF,
            factor: BACKOFF_FACTOR,
            max: MAX_BACKOFF,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self { initial, factor, max }
    }

    /// Un-jittered delay sequence, capped at `max`.
    pub fn delays(self) -> impl Iterator<Item = Duration> {
        ExponentialFactorBackoff::from_millis(self.initial.as_millis() as u64, self.factor)
            .max_delay(self.max)
    }

    /// The retry strategy for one poll cycle. Each call starts from the
    /// initial delay. Jittered delays never exceed `max`.
    pub fn strategy(self) -> impl Iterator<Item = Duration> {
        let max = self.max;
        self.delays().map(jitter).map(move |delay| delay.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial, Duration::from_secs(1));
        assert_eq!(policy.factor, 2.0);
        assert_eq!(policy.max, Duration::from_secs(300));
    }

    #[test]
    fn test_delays_grow_up_to_max() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = policy.delays().take(20).collect();

        assert!(delays[0] >= policy.initial);
        assert!(delays[0] <= policy.initial.mul_f64(policy.factor));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max));
        assert_eq!(delays.last(), Some(&policy.max));
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 3.0, Duration::from_millis(200));
        assert!(policy.strategy().take(50).all(|d| d <= policy.max));
    }

    #[test]
    fn test_default_strategy_is_capped() {
        let policy = BackoffPolicy::default();
        assert!(policy.strategy().skip(12).take(200).all(|d| d <= policy.max));
    }

    #[test]
    fn test_first_delay_stays_near_initial() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let first = policy.strategy().next().expect("Strategy is endless");
            assert!(first <= policy.initial.mul_f64(1.5));
        }
    }

    #[test]
    fn test_strategy_restarts() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 2.0, Duration::from_secs(1));
        let first: Vec<_> = policy.delays().take(3).collect();
        let second: Vec<_> = policy.delays().take(3).collect();
        assert_eq!(first, second);
    }
}

use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy with optional ±20% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a 0-indexed attempt:
    /// `min(max_backoff, initial * base^attempt)`, then ±20% jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let mut delay = base.min(self.max_backoff.as_secs_f64());

        if self.jitter {
            let jitter_amount = delay * 0.2;
            delay += rand::rng().random_range(-jitter_amount..=jitter_amount);
        }

        Duration::from_secs_f64(delay.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            exponential_base: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let p = policy(false);
        assert_eq!(p.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(8));
        assert_eq!(p.backoff_delay(5), Duration::from_secs(64));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy(false);
        assert_eq!(p.backoff_delay(10), Duration::from_secs(120));
        assert_eq!(p.backoff_delay(30), Duration::from_secs(120));
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let p = policy(true);
        for attempt in 0..8 {
            let base = (2.0_f64 * 2.0_f64.powi(attempt)).min(120.0);
            for _ in 0..50 {
                let d = p.backoff_delay(attempt as u32).as_secs_f64();
                assert!(d >= base * 0.8 - 1e-9, "attempt {}: {} too low", attempt, d);
                assert!(d <= base * 1.2 + 1e-9, "attempt {}: {} too high", attempt, d);
            }
        }
    }
}

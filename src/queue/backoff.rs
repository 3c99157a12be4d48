use rand::Rng;
use std::time::Duration;

/// Exponential retry delay: `min(base * 2^attempt, cap)` plus up to
/// `jitter_ratio` of extra random delay.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_ratio: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            cap: Duration::from_secs(600),
            jitter_ratio: 0.1,
        }
    }
}

impl Backoff {
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let max_jitter_ms = (base.as_millis() as f64 * self.jitter_ratio.max(0.0)) as u64;
        if max_jitter_ms == 0 {
            return base;
        }
        let jitter_ms = rand::rng().random_range(0..=max_jitter_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.base_delay(0), Duration::from_secs(10));
        assert_eq!(backoff.base_delay(1), Duration::from_secs(20));
        assert_eq!(backoff.base_delay(3), Duration::from_secs(80));
        assert_eq!(backoff.base_delay(6), Duration::from_secs(600));
        assert_eq!(backoff.base_delay(40), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let backoff = Backoff::default();
        for attempt in 0..8 {
            let base = backoff.base_delay(attempt);
            let delay = backoff.delay(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 10);
        }
    }

    #[test]
    fn test_zero_base_has_no_delay() {
        let backoff = Backoff {
            base: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }
}

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;

// client-go's per-item exponential failure limiter defaults.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-item exponential backoff for requeued work.
///
/// Each failure of an item doubles its next delay, starting from the base
/// delay and saturating at the maximum. [`forget`](Self::forget) clears the
/// failure history once the item succeeds.
pub struct RateLimiter<T> {
    failures: Mutex<HashMap<T, u32>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RateLimiter<T> {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
        }
    }
}

impl<T: Clone + Eq + Hash> RateLimiter<T> {
    /// Records a failure of `item` and returns how long to wait before
    /// requeueing it.
    pub fn next_delay(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock();
        let attempts = failures.entry(item.clone()).or_insert(0);
        let exponent = *attempts;
        *attempts += 1;

        match 1u32.checked_shl(exponent) {
            Some(factor) => self.base_delay.saturating_mul(factor).min(self.max_delay),
            // enough doublings to overflow always exceed the cap
            None => self.max_delay,
        }
    }

    /// How many times `item` has failed since it was last forgotten.
    pub fn failures(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }

    /// Clears the failure history of `item`.
    pub fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }
}

impl<T> Default for RateLimiter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.next_delay(&"k"), Duration::from_millis(5));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_millis(10));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_millis(20));
        assert_eq!(limiter.failures(&"k"), 3);
    }

    #[test]
    fn delay_saturates_at_max() {
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_secs(1));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_secs(2));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_secs(4));
        assert_eq!(limiter.next_delay(&"k"), Duration::from_secs(4));
    }

    #[test]
    fn delay_saturates_past_shift_overflow() {
        let limiter = RateLimiter::default();
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            last = limiter.next_delay(&"k");
        }
        assert_eq!(last, Duration::from_secs(1000));
    }

    #[test]
    fn forget_resets_the_item() {
        let limiter = RateLimiter::default();
        limiter.next_delay(&"k");
        limiter.next_delay(&"k");
        limiter.forget(&"k");
        assert_eq!(limiter.failures(&"k"), 0);
        assert_eq!(limiter.next_delay(&"k"), Duration::from_millis(5));
    }

    #[test]
    fn items_are_tracked_independently() {
        let limiter = RateLimiter::default();
        limiter.next_delay(&"a");
        limiter.next_delay(&"a");
        assert_eq!(limiter.next_delay(&"b"), Duration::from_millis(5));
    }
}

//! Exponential backoff with a cap and jitter.
//!
//! Delays double per failure from `initial` up to `cap`. Jitter picks a value
//! in the upper half of each step, and the result is never allowed to drop
//! below the previous delay, so consecutive delays are non-decreasing.
//!
//! ```
//! use sensor_node::backoff::{Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(8), 5);
//! let mut backoff = Backoff::new(policy);
//! let mut rng = rand_core::OsRng;
//!
//! let first = backoff.next_delay(&mut rng);
//! let second = backoff.next_delay(&mut rng);
//! assert!(first <= second);
//! assert!(second <= Duration::from_secs(8));
//! ```

use rand_core::RngCore;
use std::time::Duration;

/// Largest doubling exponent; keeps the multiplier from overflowing.
const MAX_EXPONENT: u32 = 16;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay step after the first failure.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Attempts allowed before giving up; zero means unlimited.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy. A `cap` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            cap: cap.max(initial),
            max_attempts,
        }
    }

    /// Policy for re-joining the WiFi network: 1 s doubling to 60 s, forever.
    pub fn link() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 0)
    }

    /// Policy for re-sending a telemetry request: 2 s doubling to 5 min,
    /// eight attempts.
    pub fn request() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300), 8)
    }

    /// True once `attempts` has used up the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }

    /// Un-jittered step for the given zero-based failure count.
    fn step(&self, failures: u32) -> Duration {
        let initial = self.initial.as_millis() as u64;
        let cap = self.cap.as_millis() as u64;
        let multiplier = 2_u64.saturating_pow(failures.min(MAX_EXPONENT));
        Duration::from_millis(initial.saturating_mul(multiplier).min(cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::link()
    }
}

/// Running backoff state for one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    last: Duration,
}

impl Backoff {
    /// Fresh state with no failures recorded.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last: Duration::ZERO,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay<G: RngCore + ?Sized>(&mut self, rng: &mut G) -> Duration {
        let step = self.policy.step(self.attempts).as_millis() as u64;
        let half = step / 2;
        let jittered = half + rng.next_u64() % (step - half + 1);

        let delay = Duration::from_millis(jittered)
            .max(self.last)
            .min(self.policy.cap);

        self.attempts = self.attempts.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Forget all failures.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last = Duration::ZERO;
    }

    /// Failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the policy's attempt budget is spent.
    pub fn exhausted(&self) -> bool {
        self.policy.exhausted(self.attempts)
    }

    /// The policy this state follows.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Generator returning a fixed sequence.
    struct SeqRng {
        values: Vec<u64>,
        pos: usize,
    }

    impl SeqRng {
        fn new(values: Vec<u64>) -> Self {
            Self { values, pos: 0 }
        }
    }

    impl RngCore for SeqRng {
        fn next_u32(&mut self) -> u32 {
            self.next_u64() as u32
        }

        fn next_u64(&mut self) -> u64 {
            let v = self.values[self.pos % self.values.len()];
            self.pos += 1;
            v
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            rand_core::impls::fill_bytes_via_next(self, dest)
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0)
    }

    #[test]
    fn test_zero_jitter_halves_step() {
        let mut backoff = Backoff::new(policy());
        let mut rng = SeqRng::new(vec![0]);
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(2000));
    }

    #[test]
    fn test_full_jitter_reaches_step() {
        let mut backoff = Backoff::new(policy());
        // 500 % 501 = 500, so the first delay lands on the full step.
        let mut rng = SeqRng::new(vec![500]);
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(1000));
    }

    #[test]
    fn test_non_decreasing_up_to_cap() {
        let mut backoff = Backoff::new(policy());
        // Alternate high and low draws so raw jitter would go backwards.
        let mut rng = SeqRng::new(vec![u64::MAX, 0, 12345, 7, u64::MAX - 3, 1]);

        let mut previous = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_delay(&mut rng);
            assert!(delay >= previous, "{:?} < {:?}", delay, previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert!(previous >= Duration::from_secs(15));
    }

    #[test]
    fn test_cap_holds_for_large_counts() {
        let mut backoff = Backoff::new(policy());
        let mut rng = SeqRng::new(vec![u64::MAX]);
        for _ in 0..100 {
            let delay = backoff.next_delay(&mut rng);
            assert!(delay <= Duration::from_secs(30));
        }
        let delay = backoff.next_delay(&mut rng);
        assert!(delay >= Duration::from_secs(15) && delay <= Duration::from_secs(30));

        // At the cap the step is 30 s; a draw of 15000 lands on the full step.
        let mut backoff = Backoff::new(policy());
        let mut rng = SeqRng::new(vec![15_000]);
        for _ in 0..100 {
            backoff.next_delay(&mut rng);
        }
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_secs(30));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(policy());
        let mut rng = SeqRng::new(vec![0]);
        for _ in 0..5 {
            backoff.next_delay(&mut rng);
        }
        assert_eq!(backoff.attempts(), 5);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(500));
    }

    #[test]
    fn test_attempt_budget() {
        let mut backoff = Backoff::new(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            3,
        ));
        let mut rng = SeqRng::new(vec![0]);
        for _ in 0..2 {
            backoff.next_delay(&mut rng);
            assert!(!backoff.exhausted());
        }
        backoff.next_delay(&mut rng);
        assert!(backoff.exhausted());
    }

    #[test]
    fn test_unlimited_policy_never_exhausts() {
        let policy = RetryPolicy::link();
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn test_cap_below_initial_is_raised() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(1), 0);
        assert_eq!(policy.cap, Duration::from_secs(5));
    }
}

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Reconnect backoff knobs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
    /// Fraction of the delay added or removed at random, in `[0, 0.5]`
    pub jitter: f64,
    /// Attempt number beyond which the delay stops growing
    pub attempt_cap: u32,
    pub floor_ms: u64,
    /// Consecutive failures tolerated; 0 = unlimited
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 800,
            factor: 1.8,
            cap_ms: 30_000,
            jitter: 0.20,
            attempt_cap: 12,
            floor_ms: 100,
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `spread` in `[-1, 1]` picks where in the jitter band the delay lands.
    pub fn delay_for(&self, attempt: u32, spread: f64) -> Duration {
        let floor = self.floor_ms as f64;
        let attempt = attempt.clamp(1, self.attempt_cap.max(1));
        let exp = self.factor.max(1.0).powi(attempt as i32 - 1);

        let raw = (self.base_ms as f64 * exp).floor();
        let mut delay = raw.max(floor).min(self.cap_ms.max(self.floor_ms) as f64);

        let jitter = self.jitter.clamp(0.0, 0.5);
        if jitter > 0.0 {
            delay = (delay * (1.0 + spread.clamp(-1.0, 1.0) * jitter)).floor().max(floor);
        }
        Duration::from_millis(delay as u64)
    }
}

/// Outcome of reporting a failed connect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { delay: Duration, attempt: u32 },
    /// Retrying was stopped by the user
    Blocked,
    /// `max_attempts` consecutive failures reached
    Exhausted { attempts: u32 },
}

/// Reconnect bookkeeping for one session
#[derive(Clone, Debug, Default)]
pub struct RetryState {
    attempt: u32,
    blocked: bool,
    next_fire_at: Option<Instant>,
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// When the pending retry fires, if one is scheduled
    pub fn next_fire_at(&self) -> Option<Instant> {
        self.next_fire_at
    }

    /// Record a failure and decide when to try again
    pub fn on_failure<R: Rng>(
        &mut self,
        policy: &RetryPolicy,
        now: Instant,
        rng: &mut R,
    ) -> RetryDecision {
        if self.blocked {
            self.next_fire_at = None;
            return RetryDecision::Blocked;
        }

        self.attempt = self.attempt.saturating_add(1);
        if policy.max_attempts > 0 && self.attempt > policy.max_attempts {
            self.next_fire_at = None;
            return RetryDecision::Exhausted {
                attempts: self.attempt - 1,
            };
        }

        let spread = if policy.jitter > 0.0 {
            rng.gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        let delay = policy.delay_for(self.attempt, spread);
        self.next_fire_at = Some(now + delay);
        RetryDecision::Scheduled {
            delay,
            attempt: self.attempt,
        }
    }

    /// The scheduled retry fired
    pub fn fired(&mut self) {
        self.next_fire_at = None;
    }

    /// Successful open: start over
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_fire_at = None;
    }

    /// Stop retrying until [`RetryState::unblock`]
    pub fn block(&mut self) {
        self.blocked = true;
        self.next_fire_at = None;
    }

    /// Manual reconnect: clear the block and the failure count
    pub fn unblock(&mut self) {
        self.blocked = false;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn within(d: Duration, center_ms: f64, spread: f64) -> bool {
        let ms = d.as_millis() as f64;
        ms >= (center_ms * (1.0 - spread)).floor() && ms <= center_ms * (1.0 + spread)
    }

    #[test]
    fn test_delay_growth_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_millis(800));
        assert_eq!(policy.delay_for(2, 0.0), Duration::from_millis(1440));
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_millis(2592));
        assert_eq!(policy.delay_for(40, 0.0), Duration::from_millis(30_000));
    }

    #[test]
    fn test_attempt_cap_limits_growth() {
        let policy = RetryPolicy {
            jitter: 0.0,
            cap_ms: u64::MAX / 2,
            attempt_cap: 3,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(3, 0.0), policy.delay_for(9, 0.0));
    }

    #[test]
    fn test_floor_applies_after_jitter() {
        let policy = RetryPolicy {
            base_ms: 100,
            jitter: 0.5,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1, -1.0), Duration::from_millis(100));
    }

    #[test]
    fn test_consecutive_failures_back_off() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = RetryState::default();
        let now = Instant::now();

        match state.on_failure(&policy, now, &mut rng) {
            RetryDecision::Scheduled { delay, attempt } => {
                assert_eq!(attempt, 1);
                assert!(within(delay, 800.0, 0.2), "{:?}", delay);
                assert_eq!(state.next_fire_at(), Some(now + delay));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
        match state.on_failure(&policy, now, &mut rng) {
            RetryDecision::Scheduled { delay, attempt } => {
                assert_eq!(attempt, 2);
                assert!(within(delay, 1440.0, 0.2), "{:?}", delay);
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        state.reset();
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn test_block_suppresses_until_unblocked() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = RetryState::default();
        let now = Instant::now();

        state.on_failure(&policy, now, &mut rng);
        state.block();
        assert_eq!(state.next_fire_at(), None);
        assert_eq!(state.on_failure(&policy, now, &mut rng), RetryDecision::Blocked);
        assert_eq!(state.on_failure(&policy, now, &mut rng), RetryDecision::Blocked);

        state.unblock();
        assert!(matches!(
            state.on_failure(&policy, now, &mut rng),
            RetryDecision::Scheduled { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_max_attempts_exhaust() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = RetryState::default();
        let now = Instant::now();

        for _ in 0..2 {
            let decision = state.on_failure(&policy, now, &mut rng);
            assert!(matches!(decision, RetryDecision::Scheduled { .. }));
        }
        assert_eq!(
            state.on_failure(&policy, now, &mut rng),
            RetryDecision::Exhausted { attempts: 2 }
        );
    }
}

//! Gateway middleware.

use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::num::NonZeroU32;

/// Tracked keys above which idle entries are swept on the next attempt.
const SWEEP_THRESHOLD: usize = 4096;

/// Per-key attempt limiter, used to throttle logins per email.
pub struct AttemptLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    per_minute: u32,
}

impl AttemptLimiter {
    /// Allow `attempts_per_minute` attempts per key. 0 is treated as 1.
    #[must_use]
    pub fn new(attempts_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            per_minute: per_minute.get(),
        }
    }

    /// Record an attempt for `key`. Returns false when over quota.
    #[must_use]
    pub fn check(&self, key: &str) -> bool {
        if self.limiter.len() >= SWEEP_THRESHOLD {
            self.retain_recent();
        }
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Forget keys whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

impl Default for AttemptLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl std::fmt::Debug for AttemptLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptLimiter")
            .field("per_minute", &self.per_minute)
            .field("tracked_keys", &self.limiter.len())
            .finish()
    }
}

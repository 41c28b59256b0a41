//! Rate limiting for password sign-in.
//!
//! Uses a token bucket per email address so a single account cannot be
//! brute forced regardless of where the attempts come from.

use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

/// Default number of password attempts allowed per email per minute.
pub const DEFAULT_SIGN_IN_ATTEMPTS_PER_MINUTE: u32 = 10;

/// Per-key rate limiter.
pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Password sign-in limiter keyed by normalised email.
#[derive(Clone)]
pub struct SignInRateLimit {
    attempts: Arc<KeyedLimiter>,
}

impl SignInRateLimit {
    /// Allow `per_minute` attempts per email, all of which may be used in a burst.
    pub fn per_minute(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            attempts: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Record an attempt for `email`. Returns false once the quota is exhausted.
    pub fn check(&self, email: &str) -> bool {
        self.attempts.check_key(&email.to_lowercase()).is_ok()
    }
}

impl Default for SignInRateLimit {
    fn default() -> Self {
        Self::per_minute(DEFAULT_SIGN_IN_ATTEMPTS_PER_MINUTE)
    }
}

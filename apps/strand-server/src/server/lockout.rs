pub const DEFAULT_LOCKOUT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_DURATION_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_duration_secs: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LOCKOUT_MAX_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
        }
    }
}

/// Per-identity brute-force counters. Only the authentication flow writes
/// these fields; every other caller treats them as opaque.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LockoutState {
    pub(crate) failed_attempts: u32,
    pub(crate) last_failed_at_unix: Option<i64>,
    pub(crate) is_locked: bool,
    pub(crate) locked_until_unix: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockoutGate {
    /// Go on to credential verification.
    Proceed,
    /// Reject without touching the failure counters.
    Locked,
}

impl LockoutState {
    /// Evaluates the lock before any credential work. An expired lock is
    /// cleared silently in the same attempt (lazy auto-unlock); a lock with
    /// no expiry is indefinite.
    pub(crate) fn gate(&mut self, now_unix: i64) -> LockoutGate {
        if self.is_locked {
            if self
                .locked_until_unix
                .is_some_and(|until| until <= now_unix)
            {
                *self = Self::default();
                return LockoutGate::Proceed;
            }
            return LockoutGate::Locked;
        }
        LockoutGate::Proceed
    }

    /// Records a failed verification; locks once the threshold is reached.
    /// The counter stays at the threshold while locked: locked rejections
    /// route through [`LockoutState::gate`] and never reach this.
    pub(crate) fn record_failure(&mut self, policy: &LockoutPolicy, now_unix: i64) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failed_at_unix = Some(now_unix);
        if self.failed_attempts >= policy.max_attempts {
            self.is_locked = true;
            self.locked_until_unix = Some(now_unix + policy.lockout_duration_secs);
        }
    }

    /// A successful authentication fully resets the counters; partial
    /// failure history carries no sticky penalty.
    pub(crate) fn record_success(&mut self) {
        *self = Self::default();
    }
}

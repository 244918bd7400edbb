//! Failure ledger and time-boxed lockout.
//!
//! Failures are tracked per scope in a sliding window. Reaching
//! `max_failed_attempts` inside the window locks the scope until
//! `now + lockout`. Expiry is lazy: the first call after `unlock_at`
//! deletes the scope entirely, failure history included.
//!
//! The controller uses the single system-wide [`UNKNOWN_SCOPE`].

use crate::types::{elapsed_between, offset_by, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Shared bucket for every unresolved face.
pub const UNKNOWN_SCOPE: &str = "unknown";

/// Default failure window.
pub const FAILURE_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct ScopeState {
    failures: VecDeque<Timestamp>,
    unlock_at: Option<Timestamp>,
}

/// What [`FailureLedger::record_failure`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    /// Failures inside the window, including this one.
    pub attempts: usize,
    pub locked_until: Option<Timestamp>,
    /// This failure tripped the lockout.
    pub tripped: bool,
}

pub struct FailureLedger {
    max_failed_attempts: usize,
    lockout: Duration,
    window: Duration,
    scopes: Mutex<HashMap<String, ScopeState>>,
}

impl FailureLedger {
    pub fn new(max_failed_attempts: u32, lockout: Duration, window: Duration) -> Self {
        Self {
            max_failed_attempts: max_failed_attempts.max(1) as usize,
            lockout,
            window,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    fn scopes(&self) -> MutexGuard<'_, HashMap<String, ScopeState>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete an expired lockout together with its failure history.
    fn expire(scopes: &mut HashMap<String, ScopeState>, scope: &str, now: Timestamp) {
        let expired = scopes
            .get(scope)
            .and_then(|s| s.unlock_at)
            .is_some_and(|unlock_at| now > unlock_at);
        if expired {
            scopes.remove(scope);
            tracing::info!(scope, "lockout expired");
        }
    }

    fn prune(&self, state: &mut ScopeState, now: Timestamp) {
        let window = self.window;
        state.failures.retain(|t| elapsed_between(*t, now) < window);
    }

    pub fn record_failure(&self, scope: &str, now: Timestamp) -> FailureRecord {
        let mut scopes = self.scopes();
        Self::expire(&mut scopes, scope, now);

        let state = scopes.entry(scope.to_string()).or_default();
        state.failures.push_back(now);
        self.prune(state, now);

        let mut tripped = false;
        // An active lockout is never extended by further failures.
        if state.unlock_at.is_none() && state.failures.len() >= self.max_failed_attempts {
            let unlock_at = offset_by(now, self.lockout);
            state.unlock_at = Some(unlock_at);
            tripped = true;
            tracing::warn!(
                scope,
                attempts = state.failures.len(),
                unlock_at = %unlock_at.to_rfc3339(),
                "too many failed recognition attempts; scope locked"
            );
        }

        FailureRecord {
            attempts: state.failures.len(),
            locked_until: state.unlock_at,
            tripped,
        }
    }

    pub fn is_locked(&self, scope: &str, now: Timestamp) -> bool {
        self.locked_until(scope, now).is_some()
    }

    /// Active lockout deadline for `scope`, expiring it first if due.
    pub fn locked_until(&self, scope: &str, now: Timestamp) -> Option<Timestamp> {
        let mut scopes = self.scopes();
        Self::expire(&mut scopes, scope, now);
        scopes.get(scope).and_then(|s| s.unlock_at)
    }

    pub fn lockout_remaining(&self, scope: &str, now: Timestamp) -> Option<Duration> {
        self.locked_until(scope, now)
            .map(|unlock_at| elapsed_between(now, unlock_at))
    }

    /// Failures for `scope` inside the window at `now`.
    pub fn failure_count(&self, scope: &str, now: Timestamp) -> usize {
        let mut scopes = self.scopes();
        Self::expire(&mut scopes, scope, now);
        match scopes.get_mut(scope) {
            Some(state) => {
                self.prune(state, now);
                state.failures.len()
            }
            None => 0,
        }
    }
}

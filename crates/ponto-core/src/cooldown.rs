//! Per-identity cooldown between accepted attendance events.
//!
//! A lingering face must not produce an event on every frame. The ledger
//! remembers the last accepted timestamp per identity and, through
//! [`CooldownLedger::try_begin`], reserves an identity while its submission
//! is in flight so two concurrent observations cannot both be accepted.

use crate::types::{elapsed_between, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct LedgerState {
    last_accepted: HashMap<String, Timestamp>,
    in_flight: HashSet<String>,
}

pub struct CooldownLedger {
    cooldown: Duration,
    state: Mutex<LedgerState>,
}

impl CooldownLedger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left before `identity` may be accepted again, or `None` if allowed now.
    /// The boundary is inclusive: exactly `cooldown` after acceptance is allowed.
    fn remaining_locked(&self, state: &LedgerState, identity: &str, now: Timestamp) -> Option<Duration> {
        let last = state.last_accepted.get(identity)?;
        let elapsed = elapsed_between(*last, now);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    pub fn is_allowed(&self, identity: &str, now: Timestamp) -> bool {
        self.remaining(identity, now).is_none()
    }

    pub fn remaining(&self, identity: &str, now: Timestamp) -> Option<Duration> {
        let state = self.state();
        self.remaining_locked(&state, identity, now)
    }

    pub fn mark_accepted(&self, identity: &str, now: Timestamp) {
        self.state().last_accepted.insert(identity.to_string(), now);
    }

    /// Atomically check the cooldown and reserve `identity` for one submission.
    ///
    /// Returns the remaining cooldown when suppressed. An identity already
    /// reserved by a concurrent observation reports the full cooldown.
    pub fn try_begin(&self, identity: &str, now: Timestamp) -> Result<CooldownPermit<'_>, Duration> {
        let mut state = self.state();
        if let Some(remaining) = self.remaining_locked(&state, identity, now) {
            return Err(remaining);
        }
        if !state.in_flight.insert(identity.to_string()) {
            return Err(self.cooldown);
        }
        Ok(CooldownPermit {
            ledger: self,
            identity: identity.to_string(),
        })
    }

    /// Number of identities with a recorded acceptance.
    pub fn len(&self) -> usize {
        self.state().last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reservation held while an identity's submission is in flight.
///
/// [`commit`](Self::commit) records the acceptance; dropping the permit
/// without committing releases the reservation and leaves no cooldown.
pub struct CooldownPermit<'a> {
    ledger: &'a CooldownLedger,
    identity: String,
}

impl CooldownPermit<'_> {
    pub fn commit(self, accepted_at: Timestamp) {
        let mut state = self.ledger.state();
        state.last_accepted.insert(self.identity.clone(), accepted_at);
        state.in_flight.remove(&self.identity);
    }
}

impl Drop for CooldownPermit<'_> {
    fn drop(&mut self) {
        self.ledger.state().in_flight.remove(&self.identity);
    }
}

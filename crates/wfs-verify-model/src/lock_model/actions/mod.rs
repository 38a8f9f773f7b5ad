//! Actions and transitions of the lock lifecycle model.
//!
//! Every transition asks `LockLifecycleModel` for its plan first and then
//! records the outcome the way `LockingVerifier` does after a conforming
//! answer, so the model checks the planning and bookkeeping code the harness
//! actually runs.

use std::time::Duration;

use wfs_verify::{
    locking::{AcquisitionPlan, LockRequest},
    protocol::LockAction,
};

use super::state::{LockSystem, Observation};

/// Actions available in the lock model.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    /// Request a lock over the features in a bit mask.
    Acquire {
        /// Bit mask of feature indices.
        features: u8,
        /// `ALL` or `SOME`.
        action: LockAction,
    },
    /// Present an issued lock id for renewal.
    Renew {
        /// Lock index.
        lock: u8,
    },
    /// Release an issued lock.
    Release {
        /// Lock index.
        lock: u8,
    },
    /// Advance the clock by one second.
    Tick,
}

/// Apply `action` to `state` with locks lasting `expiry`.
#[must_use]
pub fn apply_action(state: &LockSystem, action: Action, expiry: Duration) -> LockSystem {
    let mut next = state.clone();
    match action {
        Action::Acquire { features, action } => apply_acquire(&mut next, features, action, expiry),
        Action::Renew { lock } => apply_renew(&mut next, lock, expiry),
        Action::Release { lock } => apply_release(&mut next, lock),
        Action::Tick => apply_tick(&mut next),
    }
    next
}

fn apply_acquire(state: &mut LockSystem, features: u8, action: LockAction, expiry: Duration) {
    let now = state.now();
    let request = LockRequest::acquire(LockSystem::features_of(features), action, expiry);
    let observation = match state.locks.plan(&request, now) {
        AcquisitionPlan::Grant { covered, excluded } => {
            let lock = state.issued;
            state.issued = state.issued.saturating_add(1);
            match state
                .locks
                .on_acquired(&LockSystem::lock_id(lock), covered, action, expiry, now)
            {
                Ok(_) => Observation::Granted {
                    lock,
                    partial: !excluded.is_empty(),
                },
                Err(_) => Observation::Contradiction { lock },
            }
        }
        AcquisitionPlan::Reject(code) => Observation::Refused { code },
        AcquisitionPlan::Indeterminate { .. } => Observation::Indeterminate,
        AcquisitionPlan::Renew { .. } => Observation::Contradiction { lock: state.issued },
    };
    state.history.push(observation);
}

fn apply_renew(state: &mut LockSystem, lock: u8, expiry: Duration) {
    let now = state.now();
    let id = LockSystem::lock_id(lock);
    let observation = match state.locks.plan(&LockRequest::renew(id.as_str(), expiry), now) {
        AcquisitionPlan::Renew { .. } => match state.locks.on_renewed(&id, expiry, now) {
            Ok(()) => Observation::Renewed { lock },
            Err(_) => Observation::Contradiction { lock },
        },
        AcquisitionPlan::Reject(code) => Observation::RenewalRefused { lock, code },
        AcquisitionPlan::Grant { .. } | AcquisitionPlan::Indeterminate { .. } => {
            Observation::Contradiction { lock }
        }
    };
    state.history.push(observation);
}

fn apply_release(state: &mut LockSystem, lock: u8) {
    let now = state.now();
    let observation = if state.locks.on_released(&LockSystem::lock_id(lock), now) {
        Observation::Released { lock }
    } else {
        Observation::ReleaseIgnored { lock }
    };
    state.history.push(observation);
}

fn apply_tick(state: &mut LockSystem) {
    state.tick = state.tick.saturating_add(1);
    let expired = state.locks.refresh(state.now());
    for lock in 0..state.issued {
        if expired.contains(&LockSystem::lock_id(lock)) {
            state.history.push(Observation::Expired { lock });
        }
    }
}

#[cfg(test)]
mod tests;

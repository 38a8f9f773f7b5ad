//! Safety and reachability properties of the lock lifecycle model.
//!
//! Safety properties must hold in every explored state; reachability
//! properties confirm the exploration reached the interesting outcomes at
//! all.

use stateright::Property;
use wfs_verify::{locking::LockState, protocol::ExceptionCode};

use super::{
    LockModel,
    state::{LockSystem, Observation},
};

/// Safety property name: active locks never share a feature.
pub const MUTUAL_EXCLUSION_NAME: &str = "active locks never share a feature";
/// Safety property name: lock state agrees with the clock.
pub const STATE_MATCHES_CLOCK_NAME: &str = "lock state agrees with its deadline";
/// Safety property name: expired or released locks stay inactive.
pub const NO_RESURRECTION_NAME: &str = "expired and released locks are never renewed";
/// Safety property name: the lock model accepts its own plans.
pub const NO_CONTRADICTION_NAME: &str = "planned outcomes are always recordable";
/// Reachability property name: overlapping `ALL` lock refused.
pub const CAN_REFUSE_OVERLAP_NAME: &str = "can refuse an overlapping ALL lock";
/// Reachability property name: partial `SOME` lock granted.
pub const CAN_GRANT_PARTIAL_NAME: &str = "can grant a partial SOME lock";
/// Reachability property name: lock expires.
pub const CAN_EXPIRE_NAME: &str = "can expire a lock";
/// Reachability property name: expired lock renewal refused.
pub const CAN_REFUSE_EXPIRED_RENEWAL_NAME: &str = "can refuse renewal of an expired lock";
/// Reachability property name: lock released.
pub const CAN_RELEASE_NAME: &str = "can release a lock";

/// Safety: no feature is covered by two active locks.
#[must_use]
pub fn mutual_exclusion() -> Property<LockModel> {
    Property::always(MUTUAL_EXCLUSION_NAME, |_model, state: &LockSystem| {
        state.locks.is_mutually_exclusive(state.now())
    })
}

/// Safety: active locks are within their deadline and expired locks past it.
#[must_use]
pub fn state_matches_clock() -> Property<LockModel> {
    Property::always(STATE_MATCHES_CLOCK_NAME, |_model, state: &LockSystem| {
        let now = state.now();
        state.locks.locks().all(|lock| match lock.state {
            LockState::Active => now <= lock.expires_at(),
            LockState::Expired => now > lock.expires_at(),
            LockState::Requested | LockState::Released => true,
        })
    })
}

/// Safety: a renewal never succeeds after the lock expired or was released.
#[must_use]
pub fn no_resurrection() -> Property<LockModel> {
    Property::always(NO_RESURRECTION_NAME, |_model, state: &LockSystem| {
        state.history.iter().enumerate().all(|(idx, observation)| {
            let Observation::Renewed { lock } = *observation else {
                return true;
            };
            !state.observed_before(Observation::Expired { lock }, idx)
                && !state.observed_before(Observation::Released { lock }, idx)
        })
    })
}

/// Safety: the lock model never rejects a grant or renewal it planned.
#[must_use]
pub fn no_contradiction() -> Property<LockModel> {
    Property::always(NO_CONTRADICTION_NAME, |_model, state: &LockSystem| {
        !state
            .history
            .iter()
            .any(|o| matches!(o, Observation::Contradiction { .. }))
    })
}

fn observed(state: &LockSystem, predicate: fn(&Observation) -> bool) -> bool {
    state.history.iter().any(predicate)
}

/// Reachability: an `ALL` lock overlapping a held feature is refused.
#[must_use]
pub fn can_refuse_overlap() -> Property<LockModel> {
    Property::sometimes(CAN_REFUSE_OVERLAP_NAME, |_model, state: &LockSystem| {
        observed(state, |o| {
            *o == Observation::Refused {
                code: ExceptionCode::CannotLockAllFeatures,
            }
        })
    })
}

/// Reachability: a `SOME` lock leaves held features out.
#[must_use]
pub fn can_grant_partial() -> Property<LockModel> {
    Property::sometimes(CAN_GRANT_PARTIAL_NAME, |_model, state: &LockSystem| {
        observed(state, |o| matches!(o, Observation::Granted { partial: true, .. }))
    })
}

/// Reachability: a lock expires.
#[must_use]
pub fn can_expire() -> Property<LockModel> {
    Property::sometimes(CAN_EXPIRE_NAME, |_model, state: &LockSystem| {
        observed(state, |o| matches!(o, Observation::Expired { .. }))
    })
}

/// Reachability: renewing an expired lock is refused with `LockHasExpired`.
#[must_use]
pub fn can_refuse_expired_renewal() -> Property<LockModel> {
    Property::sometimes(CAN_REFUSE_EXPIRED_RENEWAL_NAME, |_model, state: &LockSystem| {
        state.history.iter().enumerate().any(|(idx, observation)| {
            let Observation::RenewalRefused { lock, code } = *observation else {
                return false;
            };
            code == ExceptionCode::LockHasExpired
                && state.observed_before(Observation::Expired { lock }, idx)
        })
    })
}

/// Reachability: an active lock is released.
#[must_use]
pub fn can_release() -> Property<LockModel> {
    Property::sometimes(CAN_RELEASE_NAME, |_model, state: &LockSystem| {
        observed(state, |o| matches!(o, Observation::Released { .. }))
    })
}

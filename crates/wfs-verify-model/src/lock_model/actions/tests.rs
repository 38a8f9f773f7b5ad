use std::time::Duration;

use wfs_verify::protocol::{ExceptionCode, LockAction};

use super::*;

const EXPIRY: Duration = Duration::from_secs(1);

fn run(actions: &[Action]) -> LockSystem {
    actions
        .iter()
        .fold(LockSystem::default(), |state, action| apply_action(&state, *action, EXPIRY))
}

const fn acquire(features: u8, action: LockAction) -> Action {
    Action::Acquire { features, action }
}

#[test]
fn overlapping_all_lock_is_refused() {
    let state = run(&[acquire(0b01, LockAction::All), acquire(0b11, LockAction::All)]);
    assert_eq!(
        state.history.last(),
        Some(&Observation::Refused {
            code: ExceptionCode::CannotLockAllFeatures
        })
    );
    assert_eq!(state.issued, 1);
}

#[test]
fn some_lock_is_partial_over_held_features() {
    let state = run(&[acquire(0b01, LockAction::All), acquire(0b11, LockAction::Some)]);
    assert_eq!(
        state.history.last(),
        Some(&Observation::Granted {
            lock: 1,
            partial: true
        })
    );
}

#[test]
fn some_lock_over_held_features_only_is_indeterminate() {
    let state = run(&[acquire(0b01, LockAction::All), acquire(0b01, LockAction::Some)]);
    assert_eq!(state.history.last(), Some(&Observation::Indeterminate));
}

#[test]
fn locks_expire_after_their_deadline() {
    let held = run(&[acquire(0b01, LockAction::All), Action::Tick]);
    assert!(!held.history.contains(&Observation::Expired { lock: 0 }));
    let expired = apply_action(&held, Action::Tick, EXPIRY);
    assert!(expired.history.contains(&Observation::Expired { lock: 0 }));
}

#[test]
fn expired_locks_cannot_be_renewed() {
    let state = run(&[
        acquire(0b01, LockAction::All),
        Action::Tick,
        Action::Tick,
        Action::Renew { lock: 0 },
    ]);
    assert_eq!(
        state.history.last(),
        Some(&Observation::RenewalRefused {
            lock: 0,
            code: ExceptionCode::LockHasExpired
        })
    );
}

#[test]
fn renewal_postpones_expiry() {
    let state = run(&[
        acquire(0b01, LockAction::All),
        Action::Tick,
        Action::Renew { lock: 0 },
        Action::Tick,
    ]);
    assert!(state.history.contains(&Observation::Renewed { lock: 0 }));
    assert!(!state.history.contains(&Observation::Expired { lock: 0 }));
}

#[test]
fn release_frees_features_once() {
    let state = run(&[
        acquire(0b01, LockAction::All),
        Action::Release { lock: 0 },
        Action::Release { lock: 0 },
        acquire(0b01, LockAction::All),
    ]);
    assert_eq!(
        state.history,
        vec![
            Observation::Granted {
                lock: 0,
                partial: false
            },
            Observation::Released { lock: 0 },
            Observation::ReleaseIgnored { lock: 0 },
            Observation::Granted {
                lock: 1,
                partial: false
            },
        ]
    );
}

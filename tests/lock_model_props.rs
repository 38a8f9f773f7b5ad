//! Property tests for the lock lifecycle model.
//!
//! Random sequences of acquisitions, renewals, releases and clock advances
//! are applied the way a conforming service would answer them. The model
//! must keep active locks disjoint and never revive a settled lock.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use proptest::prelude::*;
use wfs_verify::{
    locking::{AcquisitionPlan, LockLifecycleModel, LockRequest, LockState},
    protocol::{ExceptionCode, LockAction},
};

const FEATURES: [&str; 4] = ["road.1", "road.2", "road.3", "building.1"];

#[derive(Debug, Clone)]
enum Step {
    Acquire { mask: u8, some: bool, expiry: u64 },
    Renew { pick: usize, expiry: u64 },
    Release { pick: usize },
    Advance { secs: u64 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u8..16, any::<bool>(), 1u64..120)
            .prop_map(|(mask, some, expiry)| Step::Acquire { mask, some, expiry }),
        (0usize..8, 1u64..120).prop_map(|(pick, expiry)| Step::Renew { pick, expiry }),
        (0usize..8).prop_map(|pick| Step::Release { pick }),
        (0u64..90).prop_map(|secs| Step::Advance { secs }),
    ]
}

fn selected(mask: u8) -> BTreeSet<String> {
    FEATURES
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, id)| (*id).to_owned())
        .collect()
}

fn pick_id(model: &LockLifecycleModel, pick: usize) -> Option<String> {
    let ids: Vec<&str> = model.locks().map(|l| l.id.as_str()).collect();
    ids.iter().cycle().nth(pick).map(|id| (*id).to_owned())
}

struct Driver {
    model: LockLifecycleModel,
    now: Duration,
    issued: u32,
}

impl Driver {
    const fn new() -> Self {
        Self {
            model: LockLifecycleModel::new(),
            now: Duration::ZERO,
            issued: 0,
        }
    }

    fn apply(&mut self, step: &Step) -> Result<(), TestCaseError> {
        match step {
            Step::Acquire { mask, some, expiry } => {
                let action = if *some { LockAction::Some } else { LockAction::All };
                let lifetime = Duration::from_secs(*expiry);
                let request = LockRequest::acquire(selected(*mask), action, lifetime);
                match self.model.plan(&request, self.now) {
                    AcquisitionPlan::Grant { covered, .. } => {
                        self.issued = self.issued.saturating_add(1);
                        let id = format!("lock-{}", self.issued);
                        let granted =
                            self.model.on_acquired(&id, covered, action, request.expiry, self.now);
                        prop_assert!(
                            granted.is_ok(),
                            "planned grant rejected: {:?}",
                            granted.err()
                        );
                    }
                    AcquisitionPlan::Reject(code) => {
                        prop_assert_eq!(action, LockAction::All);
                        prop_assert_eq!(code, ExceptionCode::CannotLockAllFeatures);
                    }
                    AcquisitionPlan::Indeterminate { excluded } => {
                        prop_assert_eq!(action, LockAction::Some);
                        prop_assert_eq!(excluded, request.resources);
                    }
                    AcquisitionPlan::Renew { lock_id } => {
                        prop_assert!(false, "fresh acquisition planned as renewal of {lock_id}");
                    }
                }
            }
            Step::Renew { pick, expiry } => {
                let Some(id) = pick_id(&self.model, *pick) else {
                    return Ok(());
                };
                let active = self.model.get(&id).is_some_and(|l| l.is_active_at(self.now));
                let lifetime = Duration::from_secs(*expiry);
                let request = LockRequest::renew(id.as_str(), lifetime);
                match self.model.plan(&request, self.now) {
                    AcquisitionPlan::Renew { lock_id } => {
                        prop_assert!(active);
                        prop_assert_eq!(&lock_id, &id);
                        let renewed = self.model.on_renewed(&id, lifetime, self.now);
                        prop_assert!(
                            renewed.is_ok(),
                            "planned renewal rejected: {:?}",
                            renewed.err()
                        );
                    }
                    AcquisitionPlan::Reject(code) => {
                        prop_assert!(!active);
                        prop_assert_eq!(code, ExceptionCode::LockHasExpired);
                    }
                    other => prop_assert!(false, "unexpected renewal plan {other:?}"),
                }
            }
            Step::Release { pick } => {
                if let Some(id) = pick_id(&self.model, *pick) {
                    let active = self.model.get(&id).is_some_and(|l| l.is_active_at(self.now));
                    prop_assert_eq!(self.model.on_released(&id, self.now), active);
                }
            }
            Step::Advance { secs } => {
                self.now = self.now.saturating_add(Duration::from_secs(*secs));
                self.model.refresh(self.now);
            }
        }
        Ok(())
    }
}

proptest! {
    /// No feature is ever covered by two active locks.
    #[test]
    fn active_locks_stay_disjoint(steps in prop::collection::vec(step(), 1..40)) {
        let mut driver = Driver::new();
        for s in &steps {
            driver.apply(s)?;
            prop_assert!(driver.model.is_mutually_exclusive(driver.now));
        }
    }

    /// Expired and released locks stay settled and are predicted to fail.
    #[test]
    fn settled_locks_never_come_back(steps in prop::collection::vec(step(), 1..40)) {
        let mut driver = Driver::new();
        let mut settled: BTreeMap<String, LockState> = BTreeMap::new();
        for s in &steps {
            driver.apply(s)?;
            for lock in driver.model.locks() {
                if let Some(state) = settled.get(&lock.id) {
                    prop_assert_eq!(lock.state, *state);
                }
                if lock.state.is_terminal() {
                    settled.insert(lock.id.clone(), lock.state);
                }
                let expected = if lock.is_active_at(driver.now) {
                    None
                } else {
                    Some(ExceptionCode::LockHasExpired)
                };
                prop_assert_eq!(driver.model.predict_use(&lock.id, driver.now), expected);
            }
        }
    }

    /// Every planned grant covers only features nobody else holds.
    #[test]
    fn grants_cover_free_features(steps in prop::collection::vec(step(), 1..30), mask in 1u8..16) {
        let mut driver = Driver::new();
        for s in &steps {
            driver.apply(s)?;
        }
        let request =
            LockRequest::acquire(selected(mask), LockAction::Some, Duration::from_secs(60));
        let plan = driver.model.plan(&request, driver.now);
        if let AcquisitionPlan::Grant { covered, excluded } = plan {
            for id in &covered {
                prop_assert!(driver.model.holder_of(id, driver.now).is_none());
            }
            for id in &excluded {
                prop_assert!(driver.model.holder_of(id, driver.now).is_some());
            }
            let requested: BTreeSet<String> = covered.union(&excluded).cloned().collect();
            prop_assert_eq!(requested, request.resources);
        }
    }
}

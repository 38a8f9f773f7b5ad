//! Pure lock lifecycle state machine.
//!
//! The model predicts how a conforming service answers lock requests and
//! records what the service actually granted. It never performs I/O and
//! takes time as an argument, so the same type drives the verifier, the
//! simulated service and the exhaustive model check.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;

use crate::protocol::{ExceptionCode, LockAction};

/// Lifecycle state of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LockState {
    /// Sent to the service, not yet granted.
    Requested,
    /// Granted and within its expiry.
    Active,
    /// Expiry elapsed without renewal. Terminal.
    Expired,
    /// Released explicitly. Terminal.
    Released,
}

impl LockState {
    /// Return `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Expired | Self::Released) }

    /// Return `true` when `self → next` is a legal transition. Renewal is
    /// `Active → Active`.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Active)
                | (Self::Active, Self::Active | Self::Expired | Self::Released)
        )
    }
}

/// Illegal updates to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockTransitionError {
    /// A grant would leave two active locks covering one feature.
    #[error("lock {lock_id} overlaps active lock {holder} on {shared:?}")]
    MutualExclusion {
        /// Newly granted lock.
        lock_id: String,
        /// Lock already holding the features.
        holder: String,
        /// Features covered by both.
        shared: Vec<String>,
    },
    /// The lock id is already in use.
    #[error("lock id {0} is already known")]
    DuplicateId(String),
    /// No lock has this id.
    #[error("unknown lock {0}")]
    Unknown(String),
    /// The transition is not allowed from the current state.
    #[error("lock {id} cannot move from {from:?} to {to:?}")]
    Illegal {
        /// Lock id.
        id: String,
        /// Current state.
        from: LockState,
        /// Requested state.
        to: LockState,
    },
}

/// A lock known to the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lock {
    /// Server-assigned id.
    pub id: String,
    /// Features the lock covers.
    pub resources: BTreeSet<String>,
    /// Action the lock was requested with.
    pub action: LockAction,
    /// Current expiry duration.
    pub expiry: Duration,
    /// Time of acquisition or latest renewal.
    pub acquired_at: Duration,
    /// Lifecycle state.
    pub state: LockState,
    /// Number of successful renewals.
    pub renewals: u32,
}

impl Lock {
    /// Instant after which the lock is expired.
    #[must_use]
    pub const fn expires_at(&self) -> Duration { self.acquired_at.saturating_add(self.expiry) }

    /// Return `true` when the lock is active at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: Duration) -> bool {
        self.state == LockState::Active && now <= self.expires_at()
    }

    fn transition(&mut self, next: LockState) -> Result<(), LockTransitionError> {
        if !self.state.can_become(next) {
            return Err(LockTransitionError::Illegal {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// A lock request as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Features selected by the request's queries.
    pub resources: BTreeSet<String>,
    /// `ALL` or `SOME`.
    pub action: LockAction,
    /// Requested expiry.
    pub expiry: Duration,
    /// `lockId` parameter, if present.
    pub lock_id: Option<String>,
    /// Whether the request carries query expressions.
    pub has_query: bool,
}

impl LockRequest {
    /// Fresh acquisition over `resources`.
    pub fn acquire<I, S>(resources: I, action: LockAction, expiry: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            action,
            expiry,
            lock_id: None,
            has_query: true,
        }
    }

    /// Renewal of an existing lock.
    pub fn renew(lock_id: impl Into<String>, expiry: Duration) -> Self {
        Self {
            resources: BTreeSet::new(),
            action: LockAction::All,
            expiry,
            lock_id: Some(lock_id.into()),
            has_query: false,
        }
    }

    /// Attach a `lockId` to the request.
    #[must_use]
    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }
}

/// Predicted outcome of a lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionPlan {
    /// A new lock is granted over `covered`; `excluded` were already locked.
    Grant {
        /// Features the new lock covers.
        covered: BTreeSet<String>,
        /// Requested features left out.
        excluded: BTreeSet<String>,
    },
    /// The existing lock is renewed.
    Renew {
        /// Renewed lock.
        lock_id: String,
    },
    /// The request is rejected with the code.
    Reject(ExceptionCode),
    /// Conforming services may answer either way.
    Indeterminate {
        /// Requested features already locked.
        excluded: BTreeSet<String>,
    },
}

/// Locks granted during one test case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LockLifecycleModel {
    locks: BTreeMap<String, Lock>,
}

impl LockLifecycleModel {
    /// Create an empty model.
    #[must_use]
    pub const fn new() -> Self { Self { locks: BTreeMap::new() } }

    /// Lock by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Lock> { self.locks.get(id) }

    /// Every lock in id order.
    pub fn locks(&self) -> impl Iterator<Item = &Lock> { self.locks.values() }

    /// Locks active at `now`.
    pub fn active_at(&self, now: Duration) -> impl Iterator<Item = &Lock> {
        self.locks.values().filter(move |l| l.is_active_at(now))
    }

    /// Active lock covering `resource` at `now`.
    #[must_use]
    pub fn holder_of(&self, resource: &str, now: Duration) -> Option<&Lock> {
        self.active_at(now).find(|l| l.resources.contains(resource))
    }

    fn conflicts(&self, resources: &BTreeSet<String>, now: Duration) -> BTreeSet<String> {
        self.active_at(now)
            .flat_map(|l| l.resources.intersection(resources).cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Predict the outcome of `request` at `now`.
    #[must_use]
    pub fn plan(&self, request: &LockRequest, now: Duration) -> AcquisitionPlan {
        match (&request.lock_id, request.has_query) {
            (Some(_), true) => AcquisitionPlan::Reject(ExceptionCode::OperationParsingFailed),
            (Some(id), false) => self.plan_renewal(id, now),
            (None, false) => AcquisitionPlan::Reject(ExceptionCode::MissingParameterValue),
            (None, true) => self.plan_acquisition(request, now),
        }
    }

    fn plan_acquisition(&self, request: &LockRequest, now: Duration) -> AcquisitionPlan {
        let excluded = self.conflicts(&request.resources, now);
        match request.action {
            LockAction::All if !excluded.is_empty() => {
                AcquisitionPlan::Reject(ExceptionCode::CannotLockAllFeatures)
            }
            LockAction::All => AcquisitionPlan::Grant {
                covered: request.resources.clone(),
                excluded,
            },
            LockAction::Some => {
                let covered: BTreeSet<String> =
                    request.resources.difference(&excluded).cloned().collect();
                if covered.is_empty() && !excluded.is_empty() {
                    AcquisitionPlan::Indeterminate { excluded }
                } else {
                    AcquisitionPlan::Grant { covered, excluded }
                }
            }
        }
    }

    /// Predict a renewal of `lock_id` at `now`. Unknown, expired and
    /// released ids are all answered with `LockHasExpired`.
    #[must_use]
    pub fn plan_renewal(&self, lock_id: &str, now: Duration) -> AcquisitionPlan {
        match self.locks.get(lock_id) {
            Some(lock) if lock.is_active_at(now) => AcquisitionPlan::Renew {
                lock_id: lock_id.to_owned(),
            },
            _ => AcquisitionPlan::Reject(ExceptionCode::LockHasExpired),
        }
    }

    /// Exception expected when an operation presents `lock_id` at `now`.
    #[must_use]
    pub fn predict_use(&self, lock_id: &str, now: Duration) -> Option<ExceptionCode> {
        match self.locks.get(lock_id) {
            Some(lock) if lock.is_active_at(now) => None,
            _ => Some(ExceptionCode::LockHasExpired),
        }
    }

    /// Move every lock whose expiry has passed to `Expired`. Returns the
    /// ids that changed.
    pub fn refresh(&mut self, now: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        for lock in self.locks.values_mut() {
            if lock.state == LockState::Active && now > lock.expires_at() {
                lock.state = LockState::Expired;
                expired.push(lock.id.clone());
            }
        }
        expired
    }

    /// Record a lock the service granted.
    ///
    /// # Errors
    ///
    /// Returns [`LockTransitionError::DuplicateId`] when the id is reused and
    /// [`LockTransitionError::MutualExclusion`] when the grant overlaps a
    /// lock active at `now`.
    pub fn on_acquired(
        &mut self,
        id: &str,
        resources: BTreeSet<String>,
        action: LockAction,
        expiry: Duration,
        now: Duration,
    ) -> Result<&Lock, LockTransitionError> {
        self.refresh(now);
        if self.locks.contains_key(id) {
            return Err(LockTransitionError::DuplicateId(id.to_owned()));
        }
        if let Some(holder) = self.active_at(now).find(|l| !l.resources.is_disjoint(&resources)) {
            return Err(LockTransitionError::MutualExclusion {
                lock_id: id.to_owned(),
                holder: holder.id.clone(),
                shared: holder.resources.intersection(&resources).cloned().collect(),
            });
        }
        let mut lock = Lock {
            id: id.to_owned(),
            resources,
            action,
            expiry,
            acquired_at: now,
            state: LockState::Requested,
            renewals: 0,
        };
        lock.transition(LockState::Active)?;
        Ok(self.locks.entry(id.to_owned()).or_insert(lock))
    }

    /// Record a renewal the service accepted.
    ///
    /// # Errors
    ///
    /// Returns [`LockTransitionError::Unknown`] for unknown ids and
    /// [`LockTransitionError::Illegal`] when the lock is no longer active.
    pub fn on_renewed(
        &mut self,
        id: &str,
        expiry: Duration,
        now: Duration,
    ) -> Result<(), LockTransitionError> {
        self.refresh(now);
        let lock = self
            .locks
            .get_mut(id)
            .ok_or_else(|| LockTransitionError::Unknown(id.to_owned()))?;
        lock.transition(LockState::Active)?;
        lock.acquired_at = now;
        lock.expiry = expiry;
        lock.renewals = lock.renewals.saturating_add(1);
        Ok(())
    }

    /// Record a release. Releasing an expired, released or unknown lock is a
    /// no-op. Returns `true` when an active lock was released.
    pub fn on_released(&mut self, id: &str, now: Duration) -> bool {
        self.refresh(now);
        self.locks
            .get_mut(id)
            .is_some_and(|lock| lock.transition(LockState::Released).is_ok())
    }

    /// Return `true` when no feature is covered by two active locks at `now`.
    #[must_use]
    pub fn is_mutually_exclusive(&self, now: Duration) -> bool {
        let mut seen = BTreeSet::new();
        self.active_at(now)
            .flat_map(|l| l.resources.iter())
            .all(|r| seen.insert(r))
    }
}

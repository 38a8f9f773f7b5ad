//! Stateright model of lock acquisition, renewal, release and expiry.
//!
//! The explored state embeds the harness' `LockLifecycleModel`. Actions
//! request `ALL` or `SOME` locks over subsets of a small feature pool,
//! present issued lock ids for renewal or release, and advance a one-second
//! clock. The model verifies that:
//!
//! 1. **Mutual exclusion**: no feature is ever covered by two active locks.
//! 2. **Deadlines**: a lock is active exactly until its deadline has passed.
//! 3. **No resurrection**: expired and released locks are never renewed.
//! 4. **Consistency**: every outcome the lock model plans, it also records.
//!
//! # Model configuration
//!
//! - `features`: size of the feature pool (default: 3)
//! - `max_locks`: lock ids handed out before acquisitions stop (default: 2)
//! - `max_ticks`: clock ticks explored (default: 3)
//! - `expiry_ticks`: lock lifetime in ticks (default: 1)

pub mod actions;
pub mod properties;
pub mod state;

use std::time::Duration;

use stateright::{Model, Property};
use wfs_verify::{locking::LockState, protocol::LockAction};

use self::{
    actions::{Action, apply_action},
    properties::{
        can_expire,
        can_grant_partial,
        can_refuse_expired_renewal,
        can_refuse_overlap,
        can_release,
        mutual_exclusion,
        no_contradiction,
        no_resurrection,
        state_matches_clock,
    },
    state::LockSystem,
};

/// Bounds of the lock lifecycle model.
#[derive(Clone, Debug)]
pub struct LockModel {
    /// Number of features that can be locked; at most eight.
    pub features: u8,
    /// Number of lock ids handed out before acquisitions stop.
    pub max_locks: u8,
    /// Number of clock ticks explored.
    pub max_ticks: u32,
    /// Lock lifetime in ticks.
    pub expiry_ticks: u32,
}

impl Default for LockModel {
    fn default() -> Self {
        Self {
            features: 3,
            max_locks: 2,
            max_ticks: 3,
            expiry_ticks: 1,
        }
    }
}

impl LockModel {
    /// A single feature and a single lock.
    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            features: 1,
            max_locks: 1,
            max_ticks: 2,
            expiry_ticks: 1,
        }
    }

    /// Model over `features` features, clamped to between one and eight.
    #[must_use]
    pub fn with_features(features: u8) -> Self {
        Self {
            features: features.clamp(1, 8),
            ..Self::default()
        }
    }

    /// Lock lifetime.
    #[must_use]
    pub fn expiry(&self) -> Duration { Duration::from_secs(u64::from(self.expiry_ticks)) }

    fn push_acquire_actions(&self, state: &LockSystem, actions: &mut Vec<Action>) {
        if state.issued >= self.max_locks {
            return;
        }
        let all = u8::MAX >> (8 - self.features.clamp(1, 8));
        for features in 1..=all {
            for action in [LockAction::All, LockAction::Some] {
                actions.push(Action::Acquire { features, action });
            }
        }
    }

    fn push_lock_actions(state: &LockSystem, actions: &mut Vec<Action>) {
        for lock in 0..state.issued {
            actions.push(Action::Renew { lock });
            let released = state
                .locks
                .get(&LockSystem::lock_id(lock))
                .is_some_and(|l| l.state == LockState::Released);
            if !released {
                actions.push(Action::Release { lock });
            }
        }
    }
}

impl Model for LockModel {
    type State = LockSystem;
    type Action = Action;

    fn init_states(&self) -> Vec<Self::State> { vec![LockSystem::default()] }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        self.push_acquire_actions(state, actions);
        Self::push_lock_actions(state, actions);
        if state.tick < self.max_ticks {
            actions.push(Action::Tick);
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        Some(apply_action(state, action, self.expiry()))
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Safety properties
            mutual_exclusion(),
            state_matches_clock(),
            no_resurrection(),
            no_contradiction(),
            // Reachability properties
            can_refuse_overlap(),
            can_grant_partial(),
            can_expire(),
            can_refuse_expired_renewal(),
            can_release(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use stateright::{Checker, HasDiscoveries};

    use super::*;
    use crate::lock_model::properties::{
        CAN_EXPIRE_NAME,
        CAN_REFUSE_EXPIRED_RENEWAL_NAME,
        CAN_RELEASE_NAME,
    };

    #[test]
    fn default_model_has_reasonable_bounds() {
        let model = LockModel::default();
        assert_eq!(model.features, 3);
        assert!(model.max_ticks > model.expiry_ticks);
    }

    #[test]
    fn with_features_clamps() {
        assert_eq!(LockModel::with_features(0).features, 1);
        assert_eq!(LockModel::with_features(12).features, 8);
    }

    #[test]
    fn initial_actions_acquire_every_subset_and_tick() {
        let model = LockModel::default();
        let mut actions = Vec::new();
        model.actions(&LockSystem::default(), &mut actions);
        let acquisitions = actions
            .iter()
            .filter(|a| matches!(a, Action::Acquire { .. }))
            .count();
        // seven non-empty masks over three features, each as ALL and SOME
        assert_eq!(acquisitions, 14);
        assert!(actions.contains(&Action::Tick));
        assert!(!actions.iter().any(|a| matches!(a, Action::Renew { .. })));
    }

    #[test]
    fn minimal_model_reaches_single_lock_outcomes() {
        let reachable = [CAN_EXPIRE_NAME, CAN_RELEASE_NAME, CAN_REFUSE_EXPIRED_RENEWAL_NAME]
            .into_iter()
            .collect();
        let checker = LockModel::minimal()
            .checker()
            .finish_when(HasDiscoveries::AllOf(reachable))
            .spawn_bfs()
            .join();
        for name in [CAN_EXPIRE_NAME, CAN_RELEASE_NAME, CAN_REFUSE_EXPIRED_RENEWAL_NAME] {
            assert!(checker.discovery(name).is_some(), "{name} not reached");
        }
    }
}

//! State types for the lock lifecycle model.
//!
//! - [`Observation`] records what the harness would have predicted for each action
//! - [`LockSystem`] is the explored state: the harness' own lock model, the model clock and the
//!   history of observations

use std::time::Duration;

use wfs_verify::{locking::LockLifecycleModel, protocol::ExceptionCode};

/// Predicted outcome of one action.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Observation {
    /// A lock was granted.
    Granted {
        /// Index of the new lock.
        lock: u8,
        /// Whether requested features were left out.
        partial: bool,
    },
    /// An acquisition was predicted to be refused.
    Refused {
        /// Predicted exception.
        code: ExceptionCode,
    },
    /// The service may either grant or refuse.
    Indeterminate,
    /// A renewal was accepted.
    Renewed {
        /// Renewed lock.
        lock: u8,
    },
    /// A renewal was predicted to be refused.
    RenewalRefused {
        /// Lock presented.
        lock: u8,
        /// Predicted exception.
        code: ExceptionCode,
    },
    /// A lock passed its deadline.
    Expired {
        /// Expired lock.
        lock: u8,
    },
    /// An active lock was released.
    Released {
        /// Released lock.
        lock: u8,
    },
    /// A release of an inactive lock had no effect.
    ReleaseIgnored {
        /// Lock presented.
        lock: u8,
    },
    /// The lock model refused to record an outcome it had itself planned.
    Contradiction {
        /// Lock concerned.
        lock: u8,
    },
}

/// Global state of the model.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct LockSystem {
    /// Locks as the harness tracks them.
    pub locks: LockLifecycleModel,
    /// Elapsed model time in ticks of one second.
    pub tick: u32,
    /// Number of lock ids handed out.
    pub issued: u8,
    /// Observations in the order they happened.
    pub history: Vec<Observation>,
}

impl LockSystem {
    /// Model time as a duration.
    #[must_use]
    pub fn now(&self) -> Duration { Duration::from_secs(u64::from(self.tick)) }

    /// Lock id for an index.
    #[must_use]
    pub fn lock_id(index: u8) -> String { format!("lock-{index}") }

    /// Feature id for an index.
    #[must_use]
    pub fn feature_id(index: u8) -> String { format!("f{index}") }

    /// Feature ids selected by a bit mask.
    #[must_use]
    pub fn features_of(mask: u8) -> Vec<String> {
        (0..8_u8)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(Self::feature_id)
            .collect()
    }

    /// Return `true` when `observation` occurs before position `before`.
    #[must_use]
    pub fn observed_before(&self, observation: Observation, before: usize) -> bool {
        self.history.iter().take(before).any(|o| *o == observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_select_features() {
        assert_eq!(LockSystem::features_of(0b101), vec!["f0".to_owned(), "f2".to_owned()]);
        assert!(LockSystem::features_of(0).is_empty());
    }

    #[test]
    fn ticks_are_seconds() {
        let state = LockSystem {
            tick: 3,
            ..LockSystem::default()
        };
        assert_eq!(state.now(), Duration::from_secs(3));
    }
}

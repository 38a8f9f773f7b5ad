//! Model checking for the wfs-verify lock lifecycle.
//!
//! The harness predicts every lock answer with
//! `wfs_verify::locking::LockLifecycleModel`. This crate drives that same
//! model through every interleaving of acquisitions, renewals, releases and
//! clock ticks with Stateright, so a prediction that would let two active
//! locks share a feature, or revive an expired lock, is found here rather
//! than against a live service.
//!
//! ```
//! use stateright::{Checker, Model};
//! use wfs_verify_model::lock_model::LockModel;
//!
//! let checker = LockModel::minimal().checker().target_max_depth(3).spawn_bfs().join();
//! assert!(checker.unique_state_count() > 1);
//! ```

pub mod lock_model;

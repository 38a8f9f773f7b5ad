//! Locking.
//!
//! [`LockLifecycleModel`] predicts how a conforming service treats each lock
//! request and tracks the locks it granted. [`LockingVerifier`] sends the
//! requests, checks the answers against the prediction and feeds the
//! observed grants back into the model.

mod model;
mod verifier;

pub use self::{
    model::{AcquisitionPlan, Lock, LockLifecycleModel, LockRequest, LockState, LockTransitionError},
    verifier::{LockGrant, LockTarget, LockingVerifier},
};

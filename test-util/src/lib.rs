//! Test support for `wfs-verify`.
//!
//! [`SimulatedWfs`] is an in-memory WFS 2.0 service that implements the
//! harness's transport seam, so whole verification runs can execute without
//! a network. [`fixtures`] holds the feature data and capabilities documents
//! it serves, exposed as `rstest` fixtures.

pub mod fixtures;
mod service;

pub use service::{Faults, SimulatedWfs};

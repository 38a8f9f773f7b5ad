//! Conformance verification for stateful WFS 2.0 operations.
//!
//! The harness drives a service under test through feature locking, result
//! paging and stored query management, checking every response against
//! models of how a conforming service must behave. Requests are built by
//! [`request::RequestBuilder`], sent over a chosen binding by
//! [`dispatch::BindingDispatcher`] and checked by
//! [`validate::ResponseValidator`]. Everything a test case creates is
//! recorded in a [`ledger::ResourceLedger`] and released when the case
//! finishes.

pub mod capabilities;
pub mod clock;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod locking;
pub mod paging;
pub mod protocol;
pub mod request;
pub mod runner;
pub mod sampler;
pub mod select;
pub mod stored_query;
pub mod suite;
pub mod validate;
pub mod xml;

#[cfg(test)]
mod test_fixtures;

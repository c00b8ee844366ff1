//! Ad selection and rate-limited delivery.
//!
//! A request for `(client, region)` resolves the active campaigns, reads the
//! client's consumed seconds over the rolling window, walks the ads first-fit
//! and records one impression per delivered ad before answering with VAST.

#![warn(clippy::unwrap_used)]

pub mod engine;
pub mod locks;
pub mod policy;
pub mod vast;

pub use engine::{BudgetStatus, DeliveryEngine, Selection};
pub use locks::ClientLocks;
pub use policy::{Budget, FirstFit};

//! Stage services.
//!
//! Each service wraps a [`shared::Registry`] and exposes the operations of one workflow stage.
//! Every operation authorizes the caller first, then parses its keys, checks the workflow gate
//! and finally writes through the store and audits.

pub mod acceptance;
pub mod admin;
pub mod morphology;
pub mod orders;
pub mod results;
pub mod shared;
pub mod visits;

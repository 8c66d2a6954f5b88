//! Domain vocabulary shared by every charforge crate.
//!
//! This crate has zero internal dependencies so that the store adapter,
//! the provider client and the tracker all agree on the same state
//! machine and payload shapes.

pub mod artifacts;
pub mod error;
pub mod tracking;
pub mod types;

//! 3D generation job tracking.
//!
//! - [`tracker::JobTracker`]: the background reconciliation loop that
//!   polls the provider for every trackable generation and writes the
//!   resulting state back to the store.
//! - [`reconcile`]: the per-record state machine, kept free of I/O.
//! - [`submission::SubmissionService`]: hands new 3D jobs to the provider
//!   and to the tracker.
//! - [`events::TrackerEvent`]: broadcast notifications of progress and
//!   terminal transitions.

pub mod config;
pub mod events;
pub mod reconcile;
pub mod submission;
pub mod tracker;

//! In-memory logic for single-trace mapping.
//!
//! Core modules do no filesystem or process I/O. Everything here is
//! deterministic except `Job::new`, which reads the clock and the thread RNG
//! to generate a guid; tests use `Job::with_guid` instead.

pub mod failure;
pub mod handles;
pub mod protocol;
pub mod results;

//! Single-trace map execution engine.
//!
//! Runs a user-supplied map function against one performance trace inside an
//! isolated interpreter process, then turns the process's stdout into typed
//! results and failures. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (failure model, output protocol,
//!   results collection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (configuration, temporary map scripts,
//!   trace files, process execution). Isolated behind traits for tests.
//!
//! [`map_single_trace`] coordinates the two to map one trace end to end.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod map_single_trace;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

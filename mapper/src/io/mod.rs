//! I/O adapters for the trace mapper.

pub mod config;
pub mod process;
pub mod runtime;
pub mod script;
pub mod trace;

//! Stable exit codes for mapper CLI commands.

/// Command succeeded; for `map`, results were produced and no failures recorded.
pub const OK: i32 = 0;
/// Command failed due to invalid arguments/config or other host errors.
pub const INVALID: i32 = 1;
/// `mapper map` recorded at least one failure for the trace.
pub const FAILURES: i32 = 2;
/// `mapper map` hit a fatal mapping error (no output produced, malformed protocol line).
pub const INTERNAL: i32 = 3;

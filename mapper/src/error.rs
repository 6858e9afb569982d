//! Fatal errors for a mapping call.
//!
//! Per-trace problems (missing trace, runtime crash, map-function failures) are
//! recorded as [`Failure`](crate::core::failure::Failure) values in the results
//! sink. The errors here abort the call and point at a defect in the runtime,
//! the map function, or the host.

use thiserror::Error;

/// A protocol line whose prefix matched but whose payload is unusable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line {line}: invalid JSON in MAP_{tag} payload")]
    InvalidJson {
        line: usize,
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: malformed MAP_FAILURE payload: {reason}")]
    MalformedFailure { line: usize, reason: &'static str },
}

/// Errors that abort a single-trace mapping.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Internal error: No results were produced!")]
    NoResultsProduced,

    #[error("parse map runtime output: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("run map script: {0:#}")]
    Invocation(anyhow::Error),

    #[error("materialize map script: {0:#}")]
    Materialize(anyhow::Error),
}

//! Orchestration for mapping one trace with one job.
//!
//! ```text
//! Init -> TraceOpened -> RuntimeInvoked -> OutputConsumed -> Success
//!            |                |                 |        -> FailureRecorded
//!            v                v                 v
//!     FailureRecorded  FailureRecorded      FatalError (nothing recorded)
//! ```
//!
//! Per-trace problems are recorded in the results sink and the call returns
//! `Ok`. Only a run that produces nothing at all, a malformed protocol line,
//! or a host-side error aborts with [`MapError`].

use std::io::{self, Write};

use tracing::{debug, error, info, instrument, warn};

use crate::core::failure::{Failure, GENERIC_TYPE_NAME};
use crate::core::handles::{Job, TraceHandle};
use crate::core::protocol::{ProtocolEvent, parse_output};
use crate::core::results::ResultsSink;
use crate::error::MapError;
use crate::io::config::{MapperConfig, ProjectConfig};
use crate::io::runtime::{CommandRuntime, MapRuntime};
use crate::io::script::materialize_inline_modules;

pub const OPEN_TRACE_FAILED: &str = "error while opening trace";
pub const RUNTIME_FAILED: &str = "vinn runtime error while mapping trace.";

/// Terminal, non-fatal outcome of one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// At least one results batch and no failures were recorded.
    Success { results: usize },
    /// At least one failure was recorded (results may also have been added).
    FailureRecorded { failures: usize, results: usize },
}

/// Maps single traces by running the map script in the configured runtime.
///
/// Holds no per-call state, so independent calls (each with its own sink) may
/// run concurrently.
#[derive(Debug, Clone)]
pub struct TraceMapper<R> {
    runtime: R,
    project: ProjectConfig,
}

impl TraceMapper<CommandRuntime> {
    pub fn from_config(cfg: &MapperConfig) -> Self {
        Self::new(CommandRuntime::new(&cfg.runtime), cfg.project.clone())
    }
}

impl<R: MapRuntime> TraceMapper<R> {
    pub fn new(runtime: R, project: ProjectConfig) -> Self {
        Self { runtime, project }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Map one trace, forwarding runtime diagnostics to stderr.
    pub fn map<S: ResultsSink + ?Sized>(
        &self,
        results: &mut S,
        trace_handle: &dyn TraceHandle,
        job: &Job,
    ) -> Result<MapOutcome, MapError> {
        self.map_single_trace(results, trace_handle, job, &mut io::stderr())
    }

    /// Map one trace, forwarding runtime diagnostics to `diagnostics`.
    ///
    /// Writes to `diagnostics` are best-effort and never change the outcome.
    #[instrument(skip_all, fields(trace = %trace_handle.canonical_url(), job = %job.guid))]
    pub fn map_single_trace<S: ResultsSink + ?Sized, W: Write + ?Sized>(
        &self,
        results: &mut S,
        trace_handle: &dyn TraceHandle,
        job: &Job,
        diagnostics: &mut W,
    ) -> Result<MapOutcome, MapError> {
        let map_function_handle = &job.map_function_handle;
        let source_paths = self.project.all_source_paths();

        let opened = match trace_handle.open() {
            Ok(Some(opened)) => opened,
            Ok(None) => {
                warn!("trace could not be opened");
                results.add_failure(Failure::generic(
                    job,
                    map_function_handle,
                    trace_handle,
                    OPEN_TRACE_FAILED,
                ));
                return Ok(MapOutcome::FailureRecorded {
                    failures: 1,
                    results: 0,
                });
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "trace open failed");
                results.add_failure(Failure::new(
                    job,
                    map_function_handle,
                    trace_handle,
                    GENERIC_TYPE_NAME,
                    OPEN_TRACE_FAILED,
                    format!("{err:#}"),
                ));
                return Ok(MapOutcome::FailureRecorded {
                    failures: 1,
                    results: 0,
                });
            }
        };
        debug!(path = %opened.path().display(), "trace opened");

        let (runtime_handle, scripts) =
            materialize_inline_modules(map_function_handle).map_err(MapError::Materialize)?;
        let args = vec![
            trace_handle.as_dict().to_string(),
            runtime_handle.as_dict().to_string(),
            opened.path().to_string_lossy().into_owned(),
        ];
        let run = self
            .runtime
            .run_file(&self.project.map_script_path(), &source_paths, &args);
        drop(scripts);
        drop(opened);
        let run = run.map_err(MapError::Invocation)?;

        if !run.success() {
            warn!(exit_code = ?run.exit_code, "map runtime failed");
            if let Err(err) = diagnostics.write_all(run.stdout.as_bytes()) {
                debug!(err = %err, "failed to forward runtime output");
            }
            results.add_failure(Failure::generic(
                job,
                map_function_handle,
                trace_handle,
                RUNTIME_FAILED,
            ));
            return Ok(MapOutcome::FailureRecorded {
                failures: 1,
                results: 0,
            });
        }

        let mut added_results = 0usize;
        let mut added_failures = 0usize;
        for event in parse_output(&run.stdout) {
            match event? {
                ProtocolEvent::Failure(record) => {
                    debug!(kind = ?record.kind, "map failure reported");
                    results.add_failure(Failure::from_record(
                        record,
                        job,
                        map_function_handle,
                        trace_handle,
                    ));
                    added_failures += 1;
                }
                ProtocolEvent::Results(batch) => {
                    results.add_results(batch);
                    added_results += 1;
                }
                ProtocolEvent::Diagnostic(line) => forward_diagnostic(diagnostics, &line),
            }
        }

        if added_results == 0 && added_failures == 0 {
            error!("map runtime produced neither results nor failures");
            return Err(MapError::NoResultsProduced);
        }

        info!(
            results = added_results,
            failures = added_failures,
            "trace mapped"
        );
        if added_failures > 0 {
            Ok(MapOutcome::FailureRecorded {
                failures: added_failures,
                results: added_results,
            })
        } else {
            Ok(MapOutcome::Success {
                results: added_results,
            })
        }
    }
}

fn forward_diagnostic<W: Write + ?Sized>(diagnostics: &mut W, line: &str) {
    if let Err(err) = writeln!(diagnostics, "{line}") {
        debug!(err = %err, "failed to forward diagnostic line");
    }
}

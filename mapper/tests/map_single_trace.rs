//! End-to-end tests for single-trace mapping.
//!
//! Most tests drive `TraceMapper` with a `ScriptedRuntime`, so the runtime's
//! stdout and exit code are fixed per test. The unix-only tests at the bottom
//! run a real `sh` script through `CommandRuntime`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mapper::core::failure::FailureKind;
use mapper::core::handles::{MapFunctionHandle, ModuleToLoad};
use mapper::core::results::MapResults;
use mapper::error::{MapError, ProtocolError};
use mapper::io::config::ProjectConfig;
use mapper::io::runtime::{MapRuntime, RunOutput};
use mapper::map_single_trace::{MapOutcome, OPEN_TRACE_FAILED, RUNTIME_FAILED, TraceMapper};
use mapper::test_support::{FakeTraceHandle, ScriptedRuntime, inline_job, job};
use serde_json::json;

fn project() -> ProjectConfig {
    ProjectConfig {
        root: PathBuf::from("/checkout"),
        source_paths: vec![PathBuf::from("/checkout/third_party/tracing")],
        map_script: PathBuf::from("perf_insights/mre/map_single_trace_cmdline.html"),
    }
}

fn map_with(
    runtime: ScriptedRuntime,
    trace: &FakeTraceHandle,
) -> (
    TraceMapper<ScriptedRuntime>,
    MapResults,
    Result<MapOutcome, MapError>,
) {
    let mapper = TraceMapper::new(runtime, project());
    let mut results = MapResults::new();
    let outcome = mapper.map_single_trace(&mut results, trace, &job(), &mut io::sink());
    (mapper, results, outcome)
}

/// A trace that cannot be opened yields exactly one generic failure, and the
/// runtime is never invoked.
#[test]
fn unopenable_trace_records_one_generic_failure() {
    let trace = FakeTraceHandle::missing("file:///traces/missing.json");
    let (mapper, results, outcome) = map_with(ScriptedRuntime::default(), &trace);

    let outcome = outcome.expect("map");
    assert_eq!(
        outcome,
        MapOutcome::FailureRecorded {
            failures: 1,
            results: 0
        }
    );
    assert!(results.results().is_empty());
    assert_eq!(results.failures().len(), 1);

    let failure = &results.failures()[0];
    assert_eq!(failure.kind(), FailureKind::Generic);
    assert_eq!(failure.failure_type_name(), "Error");
    assert_eq!(failure.description(), OPEN_TRACE_FAILED);
    assert_eq!(failure.stack(), "Unknown stack");
    assert_eq!(failure.job(), &job());
    assert!(mapper.runtime().calls().is_empty());
}

/// A non-zero exit yields one generic runtime failure, whatever stdout said.
#[test]
fn non_zero_exit_records_runtime_failure_and_ignores_stdout() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let stdout = "MAP_RESULTS: {\"ignored\": true}\nMAP_FAILURE: {\"failure_type_name\": \"MapFunctionError\"}\n";
    let mapper = TraceMapper::new(ScriptedRuntime::with_stdout(1, stdout), project());
    let mut results = MapResults::new();
    let mut diagnostics = Vec::new();

    let outcome = mapper
        .map_single_trace(&mut results, &trace, &job(), &mut diagnostics)
        .expect("map");

    assert_eq!(
        outcome,
        MapOutcome::FailureRecorded {
            failures: 1,
            results: 0
        }
    );
    assert!(results.results().is_empty());
    assert_eq!(results.failures().len(), 1);
    assert_eq!(results.failures()[0].kind(), FailureKind::Generic);
    assert_eq!(results.failures()[0].description(), RUNTIME_FAILED);
    assert_eq!(String::from_utf8(diagnostics).expect("utf8"), stdout);
    assert!(trace.released());
}

/// A killed runtime (no exit code) is treated like a non-zero exit.
#[test]
fn killed_runtime_records_runtime_failure() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::new(vec![Ok(RunOutput {
        exit_code: None,
        stdout: String::new(),
    })]);
    let (_, results, outcome) = map_with(runtime, &trace);

    outcome.expect("map");
    assert_eq!(results.failures().len(), 1);
    assert_eq!(results.failures()[0].description(), RUNTIME_FAILED);
}

/// One well-formed results line adds exactly that payload.
#[test]
fn single_results_line_adds_one_batch() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::with_stdout(
        0,
        "MAP_RESULTS: {\"wall_time\": 12.5, \"threads\": [\"main\", \"io\"]}\n",
    );
    let (_, results, outcome) = map_with(runtime, &trace);

    assert_eq!(outcome.expect("map"), MapOutcome::Success { results: 1 });
    assert_eq!(
        results.results(),
        &[json!({"wall_time": 12.5, "threads": ["main", "io"]})]
    );
    assert!(results.failures().is_empty());
}

/// A TraceImportError failure line records that kind with every field kept.
#[test]
fn trace_import_error_keeps_payload_fields() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::with_stdout(
        0,
        r#"MAP_FAILURE: {"failure_type_name": "TraceImportError", "description": "bad magic", "stack": "importer.html:42", "importer": "json"}"#,
    );
    let (_, results, outcome) = map_with(runtime, &trace);

    assert_eq!(
        outcome.expect("map"),
        MapOutcome::FailureRecorded {
            failures: 1,
            results: 0
        }
    );
    let failure = &results.failures()[0];
    assert_eq!(failure.kind(), FailureKind::TraceImportError);
    assert_eq!(failure.failure_type_name(), "TraceImportError");
    assert_eq!(failure.description(), "bad magic");
    assert_eq!(failure.stack(), "importer.html:42");
    assert_eq!(failure.extra().get("importer"), Some(&json!("json")));
    assert_eq!(failure.trace_handle()["canonical_url"], "file:///traces/a.json");
}

/// An unrecognized failure type becomes a generic failure without raising.
#[test]
fn unknown_failure_type_records_generic_failure() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::with_stdout(
        0,
        r#"MAP_FAILURE: {"failure_type_name": "QuotaExceededError", "description": "x"}"#,
    );
    let (_, results, outcome) = map_with(runtime, &trace);

    outcome.expect("map");
    let failure = &results.failures()[0];
    assert_eq!(failure.kind(), FailureKind::Generic);
    assert_eq!(failure.failure_type_name(), "QuotaExceededError");
}

/// Output without any protocol lines is a fatal error.
#[test]
fn no_protocol_lines_is_fatal() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::with_stdout(0, "starting\nall done\n");
    let (_, results, outcome) = map_with(runtime, &trace);

    let err = outcome.unwrap_err();
    assert!(matches!(err, MapError::NoResultsProduced));
    assert!(err.to_string().contains("No results were produced"));
    assert!(results.is_empty());
    assert!(trace.released());
}

/// Malformed JSON on a protocol line aborts, keeping what was routed before it.
#[test]
fn malformed_payload_is_fatal_and_keeps_prior_entries() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let runtime = ScriptedRuntime::with_stdout(
        0,
        "MAP_RESULTS: {\"a\": 1}\nMAP_RESULTS: {\"b\": \nMAP_RESULTS: {\"c\": 3}\n",
    );
    let (_, results, outcome) = map_with(runtime, &trace);

    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        MapError::Protocol(ProtocolError::InvalidJson { line: 2, .. })
    ));
    assert_eq!(results.results(), &[json!({"a": 1})]);
}

/// Reordering unrelated lines only changes the order of sink entries.
#[test]
fn reordering_lines_changes_only_order() {
    let results_line = r#"MAP_RESULTS: {"a": 1}"#;
    let failure_line = r#"MAP_FAILURE: {"failure_type_name": "MapFunctionError", "description": "x"}"#;
    let other_results = r#"MAP_RESULTS: {"b": 2}"#;

    let forward = format!("{results_line}\n{failure_line}\n{other_results}\n");
    let backward = format!("{other_results}\n{failure_line}\n{results_line}\n");

    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let (_, forward_results, _) = map_with(ScriptedRuntime::with_stdout(0, &forward), &trace);
    let (_, backward_results, _) = map_with(ScriptedRuntime::with_stdout(0, &backward), &trace);

    let mut reversed = backward_results.results().to_vec();
    reversed.reverse();
    assert_eq!(forward_results.results(), reversed.as_slice());
    assert_eq!(forward_results.failures(), backward_results.failures());
}

/// The runtime receives the map script, ordered source paths, and serialized handles.
#[test]
fn runtime_receives_script_paths_and_arguments() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let (mapper, _, outcome) = map_with(ScriptedRuntime::with_stdout(0, "MAP_RESULTS: []"), &trace);
    outcome.expect("map");

    let calls = mapper.runtime().calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(
        call.script,
        PathBuf::from("/checkout/perf_insights/mre/map_single_trace_cmdline.html")
    );
    assert_eq!(
        call.source_paths,
        vec![
            PathBuf::from("/checkout/third_party/tracing"),
            PathBuf::from("/checkout")
        ]
    );
    let trace_arg: serde_json::Value = serde_json::from_str(&call.args[0]).expect("trace json");
    assert_eq!(trace_arg, json!({"type": "fake", "canonical_url": "file:///traces/a.json"}));
    let handle_arg: serde_json::Value = serde_json::from_str(&call.args[1]).expect("handle json");
    assert_eq!(handle_arg, job().map_function_handle.as_dict());
    assert_eq!(call.args[2], "/traces/a.json");
}

/// The opened trace is released even when the runtime invocation errors.
#[test]
fn trace_released_when_invocation_fails() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let (_, results, outcome) = map_with(ScriptedRuntime::failing("vinn not found"), &trace);

    let err = outcome.unwrap_err();
    assert!(matches!(err, MapError::Invocation(_)));
    assert!(err.to_string().contains("vinn not found"));
    assert_eq!(trace.opens(), 1);
    assert!(trace.released());
    assert!(results.is_empty());
}

/// Inline map sources exist as files during the run and are gone afterwards.
#[test]
fn inline_sources_live_only_for_the_invocation() {
    let trace = FakeTraceHandle::present("file:///traces/a.json");
    let mapper = TraceMapper::new(
        ScriptedRuntime::with_stdout(0, "MAP_RESULTS: {}"),
        project(),
    );
    let job = inline_job("function inlineMap(results, model) {}");
    let mut results = MapResults::new();

    mapper
        .map_single_trace(&mut results, &trace, &job, &mut io::sink())
        .expect("map");

    let calls = mapper.runtime().calls();
    let handle_arg: MapFunctionHandle =
        serde_json::from_str(&calls[0].args[1]).expect("handle json");
    let [ModuleToLoad::Filename(script)] = handle_arg.modules_to_load.as_slice() else {
        panic!("expected one filename module, got {:?}", handle_arg.modules_to_load);
    };
    assert_eq!(calls[0].existing_module_files, vec![script.clone()]);
    assert!(!script.exists());
    assert_eq!(results.results().len(), 1);
}

/// Runtime that waits until a second call is in flight before answering.
#[derive(Default)]
struct RendezvousRuntime {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MapRuntime for RendezvousRuntime {
    fn run_file(
        &self,
        _script: &Path,
        _source_paths: &[PathBuf],
        _args: &[String],
    ) -> anyhow::Result<RunOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.in_flight.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.peak
            .fetch_max(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RunOutput {
            exit_code: Some(0),
            stdout: "MAP_RESULTS: {\"ok\": true}\n".to_string(),
        })
    }
}

/// Independent `map` calls on one mapper run their runtimes at the same time.
#[test]
fn concurrent_maps_overlap() {
    let mapper = TraceMapper::new(RendezvousRuntime::default(), project());

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let mapper = &mapper;
                scope.spawn(move || {
                    let trace = FakeTraceHandle::present(&format!("file:///traces/{name}.json"));
                    let mut results = MapResults::new();
                    let outcome = mapper.map(&mut results, &trace, &job());
                    (outcome.expect("map"), results)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect()
    });

    assert_eq!(mapper.runtime().peak.load(Ordering::SeqCst), 2);
    for (outcome, results) in outcomes {
        assert_eq!(outcome, MapOutcome::Success { results: 1 });
        assert_eq!(results.results(), &[json!({"ok": true})]);
    }
}

#[cfg(unix)]
mod command_runtime {
    use std::fs;

    use mapper::core::results::MapResults;
    use mapper::error::MapError;
    use mapper::io::config::{MapperConfig, ProjectConfig, RuntimeConfig};
    use mapper::io::trace::LocalFileTraceHandle;
    use mapper::map_single_trace::{MapOutcome, TraceMapper};
    use mapper::test_support::job;
    use serde_json::json;

    fn config(root: &std::path::Path) -> MapperConfig {
        MapperConfig {
            project: ProjectConfig {
                root: root.to_path_buf(),
                source_paths: Vec::new(),
                map_script: "map.sh".into(),
            },
            runtime: RuntimeConfig {
                command: vec!["sh".to_string()],
                timeout_secs: 10,
                output_limit_bytes: 1_000_000,
            },
        }
    }

    #[test]
    fn maps_local_trace_through_shell_runtime() {
        let temp = tempfile::tempdir().expect("tempdir");
        let trace_path = temp.path().join("trace.json");
        fs::write(&trace_path, "{\"traceEvents\": [1, 2, 3]}").expect("write trace");
        fs::write(
            temp.path().join("map.sh"),
            "echo \"reading $3\" >&2\necho 'progress: 50%'\nprintf 'MAP_RESULTS: {\"bytes\": %s}\\n' \"$(wc -c < \"$3\" | tr -d ' ')\"\n",
        )
        .expect("write script");

        let mapper = TraceMapper::from_config(&config(temp.path()));
        let trace = LocalFileTraceHandle::new(&trace_path);
        let mut results = MapResults::new();
        let mut diagnostics = Vec::new();

        let outcome = mapper
            .map_single_trace(&mut results, &trace, &job(), &mut diagnostics)
            .expect("map");

        assert_eq!(outcome, MapOutcome::Success { results: 1 });
        assert_eq!(results.results(), &[json!({"bytes": 26})]);
        assert_eq!(
            String::from_utf8(diagnostics).expect("utf8"),
            "progress: 50%\n"
        );
    }

    #[test]
    fn missing_trace_file_never_runs_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("ran");
        fs::write(
            temp.path().join("map.sh"),
            format!("touch {}\necho 'MAP_RESULTS: {{}}'\n", marker.display()),
        )
        .expect("write script");

        let mapper = TraceMapper::from_config(&config(temp.path()));
        let trace = LocalFileTraceHandle::new(temp.path().join("absent.json"));
        let mut results = MapResults::new();

        mapper
            .map_single_trace(&mut results, &trace, &job(), &mut std::io::sink())
            .expect("map");

        assert_eq!(results.failures().len(), 1);
        assert!(!marker.exists());
    }

    #[test]
    fn output_over_limit_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let trace_path = temp.path().join("trace.json");
        fs::write(&trace_path, "{}").expect("write trace");
        fs::write(
            temp.path().join("map.sh"),
            "echo 'MAP_RESULTS: {\"a\": 1}'\necho 'MAP_RESULTS: {\"b\": 2}'\n",
        )
        .expect("write script");

        let mut cfg = config(temp.path());
        cfg.runtime.output_limit_bytes = 22;
        let mapper = TraceMapper::from_config(&cfg);
        let trace = LocalFileTraceHandle::new(&trace_path);
        let mut results = MapResults::new();

        let err = mapper
            .map_single_trace(&mut results, &trace, &job(), &mut std::io::sink())
            .unwrap_err();

        assert!(matches!(err, MapError::Invocation(_)), "{err}");
        assert!(err.to_string().contains("truncated"), "{err}");
        assert!(results.is_empty());
    }
}

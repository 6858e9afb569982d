//! Test-only runtimes and handles for driving the trace mapper without
//! spawning processes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::handles::{Job, MapFunctionHandle, ModuleToLoad, OpenedTrace, TraceHandle};
use crate::io::runtime::{MapRuntime, RunOutput};

/// Deterministic job with a fixed guid and a single href module.
pub fn job() -> Job {
    Job::with_guid(
        "job-1",
        MapFunctionHandle::new(
            vec![ModuleToLoad::Href(
                "/perf_insights/test_data/map_fn.html".to_string(),
            )],
            "testMapFunction",
        ),
    )
}

/// Job whose map function is inline source.
pub fn inline_job(source: &str) -> Job {
    Job::with_guid(
        "job-inline",
        MapFunctionHandle::new(vec![ModuleToLoad::Source(source.to_string())], "inlineMap"),
    )
}

/// One invocation observed by [`ScriptedRuntime`].
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub script: PathBuf,
    pub source_paths: Vec<PathBuf>,
    pub args: Vec<String>,
    /// `filename` modules from the map function descriptor that existed at call time.
    pub existing_module_files: Vec<PathBuf>,
}

/// Runtime that returns queued outputs in order and records each call.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    outputs: RefCell<VecDeque<Result<RunOutput, String>>>,
    calls: RefCell<Vec<RecordedRun>>,
}

impl ScriptedRuntime {
    pub fn new(outputs: Vec<Result<RunOutput, String>>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_stdout(exit_code: i32, stdout: &str) -> Self {
        Self::new(vec![Ok(RunOutput {
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
        })])
    }

    /// Runtime whose invocation fails before producing output.
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }

    pub fn calls(&self) -> Vec<RecordedRun> {
        self.calls.borrow().clone()
    }
}

impl MapRuntime for ScriptedRuntime {
    fn run_file(
        &self,
        script: &Path,
        source_paths: &[PathBuf],
        args: &[String],
    ) -> Result<RunOutput> {
        self.calls.borrow_mut().push(RecordedRun {
            script: script.to_path_buf(),
            source_paths: source_paths.to_vec(),
            args: args.to_vec(),
            existing_module_files: existing_module_files(args),
        });
        match self.outputs.borrow_mut().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted runtime exhausted")),
        }
    }
}

fn existing_module_files(args: &[String]) -> Vec<PathBuf> {
    let Some(descriptor) = args
        .get(1)
        .and_then(|raw| serde_json::from_str::<MapFunctionHandle>(raw).ok())
    else {
        return Vec::new();
    };
    descriptor
        .modules_to_load
        .into_iter()
        .filter_map(|module| match module {
            ModuleToLoad::Filename(path) if path.exists() => Some(path),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
enum OpenBehavior {
    Present,
    Missing,
    Failing(String),
}

/// Trace handle that tracks how often it was opened and whether the opened
/// resource was released.
#[derive(Debug, Clone)]
pub struct FakeTraceHandle {
    canonical_url: String,
    behavior: OpenBehavior,
    opens: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl FakeTraceHandle {
    fn with_behavior(canonical_url: &str, behavior: OpenBehavior) -> Self {
        Self {
            canonical_url: canonical_url.to_string(),
            behavior,
            opens: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens to a resource at `/traces/<last url segment>`.
    pub fn present(canonical_url: &str) -> Self {
        Self::with_behavior(canonical_url, OpenBehavior::Present)
    }

    /// Opens to no resource.
    pub fn missing(canonical_url: &str) -> Self {
        Self::with_behavior(canonical_url, OpenBehavior::Missing)
    }

    /// Open returns an error.
    pub fn failing(canonical_url: &str, message: &str) -> Self {
        Self::with_behavior(canonical_url, OpenBehavior::Failing(message.to_string()))
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn trace_path(&self) -> PathBuf {
        let name = self
            .canonical_url
            .rsplit('/')
            .next()
            .unwrap_or("trace.json");
        PathBuf::from("/traces").join(name)
    }
}

impl TraceHandle for FakeTraceHandle {
    fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    fn open(&self) -> Result<Option<Box<dyn OpenedTrace>>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            OpenBehavior::Present => Ok(Some(Box::new(FakeOpenedTrace {
                path: self.trace_path(),
                released: Arc::clone(&self.released),
            }))),
            OpenBehavior::Missing => Ok(None),
            OpenBehavior::Failing(message) => Err(anyhow!(message.clone())),
        }
    }

    fn as_dict(&self) -> Value {
        json!({"type": "fake", "canonical_url": self.canonical_url})
    }
}

struct FakeOpenedTrace {
    path: PathBuf,
    released: Arc<AtomicBool>,
}

impl OpenedTrace for FakeOpenedTrace {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FakeOpenedTrace {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

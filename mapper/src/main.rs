//! Single-trace map runner.
//!
//! Runs a map function against one trace in the configured runtime and prints
//! the collected results and failures as JSON on stdout. Runtime diagnostics
//! and logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::debug;

use mapper::core::handles::{Job, MapFunctionHandle, ModuleToLoad};
use mapper::core::protocol::{ProtocolEvent, parse_output};
use mapper::core::results::MapResults;
use mapper::exit_codes;
use mapper::io::config::{DEFAULT_CONFIG_PATH, MapperConfig, load_config, write_config};
use mapper::io::trace::LocalFileTraceHandle;
use mapper::map_single_trace::{MapOutcome, TraceMapper};

#[derive(Parser)]
#[command(
    name = "mapper",
    version,
    about = "Run a map function against a single trace"
)]
struct Cli {
    /// Path to the mapper config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Map one trace and print results as JSON.
    Map {
        /// Trace file to map.
        #[arg(long)]
        trace: PathBuf,
        /// Name of the map function to call.
        #[arg(long)]
        function_name: String,
        /// Module href resolved by the runtime against its source paths.
        #[arg(long = "href")]
        hrefs: Vec<String>,
        /// Module file to load.
        #[arg(long = "module")]
        modules: Vec<PathBuf>,
        /// File with inline map-function source, wrapped into a temporary map script.
        #[arg(long = "source")]
        sources: Vec<PathBuf>,
    },
    /// Parse captured runtime stdout and print one JSON line per event.
    Parse {
        /// File holding the captured stdout.
        path: PathBuf,
    },
}

fn main() {
    mapper::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Map {
            trace,
            function_name,
            hrefs,
            modules,
            sources,
        } => {
            let handle = build_map_function_handle(function_name, hrefs, modules, &sources)?;
            cmd_map(&cli.config, &trace, handle)
        }
        Command::Parse { path } => cmd_parse(&path),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("config exists: {}", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &MapperConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("config written: {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_map(config_path: &Path, trace_path: &Path, handle: MapFunctionHandle) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let mapper = TraceMapper::from_config(&cfg);
    let trace = LocalFileTraceHandle::new(trace_path);
    let job = Job::new(handle);
    debug!(job = %job.guid, trace = %trace_path.display(), "mapping trace");

    let mut results = MapResults::new();
    let outcome = mapper.map(&mut results, &trace, &job);
    print_json(&results.as_dict())?;

    match outcome {
        Ok(MapOutcome::Success { .. }) => Ok(exit_codes::OK),
        Ok(MapOutcome::FailureRecorded { .. }) => Ok(exit_codes::FAILURES),
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_codes::INTERNAL)
        }
    }
}

fn cmd_parse(path: &Path) -> Result<i32> {
    let stdout = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for event in parse_output(&stdout) {
        match event {
            Ok(event) => println!("{}", event_json(&event)),
            Err(err) => {
                eprintln!("{err}");
                return Ok(exit_codes::INTERNAL);
            }
        }
    }
    Ok(exit_codes::OK)
}

fn build_map_function_handle(
    function_name: String,
    hrefs: Vec<String>,
    modules: Vec<PathBuf>,
    sources: &[PathBuf],
) -> Result<MapFunctionHandle> {
    let mut modules_to_load: Vec<ModuleToLoad> = hrefs
        .into_iter()
        .map(ModuleToLoad::Href)
        .chain(modules.into_iter().map(ModuleToLoad::Filename))
        .collect();
    for path in sources {
        let source =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        modules_to_load.push(ModuleToLoad::Source(source));
    }
    if modules_to_load.is_empty() {
        bail!("at least one of --href, --module or --source is required");
    }
    Ok(MapFunctionHandle::new(modules_to_load, function_name))
}

fn event_json(event: &ProtocolEvent) -> Value {
    match event {
        ProtocolEvent::Results(payload) => json!({"event": "results", "payload": payload}),
        ProtocolEvent::Failure(record) => json!({
            "event": "failure",
            "kind": format!("{:?}", record.kind),
            "fields": record.fields,
        }),
        ProtocolEvent::Diagnostic(text) => json!({"event": "diagnostic", "text": text}),
    }
}

/// Print `value` as pretty-printed JSON with trailing newline.
fn print_json(value: &Value) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

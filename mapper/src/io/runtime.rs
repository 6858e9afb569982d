//! Runtime abstraction for executing map scripts.
//!
//! The [`MapRuntime`] trait decouples the trace mapper from how the isolated
//! interpreter is launched. Tests use scripted runtimes that return
//! predetermined output without spawning processes.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::config::RuntimeConfig;
use crate::io::process::run_with_timeout;

/// Environment variable carrying the source search paths to the runtime.
pub const SOURCE_PATHS_ENV: &str = "MAP_SOURCE_PATHS";

/// Outcome of one runtime invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Process exit code; `None` if the runtime was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a script file against a set of source search paths.
pub trait MapRuntime {
    fn run_file(
        &self,
        script: &Path,
        source_paths: &[PathBuf],
        args: &[String],
    ) -> Result<RunOutput>;
}

/// Runtime that spawns the configured interpreter command.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(
        &self,
        script: &Path,
        source_paths: &[PathBuf],
        args: &[String],
    ) -> Result<Command> {
        let (program, extra) = self
            .command
            .split_first()
            .context("runtime command is empty")?;
        let joined = env::join_paths(source_paths).context("join source paths")?;
        let mut cmd = Command::new(program);
        cmd.args(extra)
            .arg(script)
            .args(args)
            .env(SOURCE_PATHS_ENV, joined);
        Ok(cmd)
    }
}

impl MapRuntime for CommandRuntime {
    #[instrument(skip_all, fields(script = %script.display(), timeout_secs = self.timeout.as_secs()))]
    fn run_file(
        &self,
        script: &Path,
        source_paths: &[PathBuf],
        args: &[String],
    ) -> Result<RunOutput> {
        let cmd = self.build_command(script, source_paths, args)?;
        info!(program = %cmd.get_program().to_string_lossy(), "starting map runtime");
        let output = run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("run map runtime")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "map runtime timed out");
        }
        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr), "map runtime stderr");
        }
        if output.stdout_truncated > 0 {
            if output.success() {
                bail!(
                    "map runtime stdout exceeded {} bytes ({} bytes truncated)",
                    self.output_limit_bytes,
                    output.stdout_truncated
                );
            }
            warn!(
                stdout_truncated = output.stdout_truncated,
                "failed map runtime stdout truncated"
            );
        }

        Ok(RunOutput {
            exit_code: output.exit_code,
            stdout: decode_stdout(output.stdout),
        })
    }
}

fn decode_stdout(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(stdout) => stdout,
        Err(err) => {
            warn!(
                valid_up_to = err.utf8_error().valid_up_to(),
                "map runtime stdout is not valid UTF-8, replacing invalid bytes"
            );
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

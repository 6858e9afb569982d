//! Mapper configuration stored in `mapper.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "mapper.toml";

/// Mapper configuration (TOML).
///
/// Missing fields default to values that match a standard perf_insights
/// checkout driven by `vinn`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MapperConfig {
    pub project: ProjectConfig,
    pub runtime: RuntimeConfig,
}

/// Where the map runtime finds its sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root; always searched after `source_paths`.
    pub root: PathBuf,

    /// Additional source search paths, searched in order.
    pub source_paths: Vec<PathBuf>,

    /// Command-line map script, relative to `root` unless absolute.
    pub map_script: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            source_paths: Vec::new(),
            map_script: PathBuf::from("perf_insights/mre/map_single_trace_cmdline.html"),
        }
    }
}

impl ProjectConfig {
    /// Configured source paths followed by the project root.
    pub fn all_source_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.source_paths.clone();
        paths.push(self.root.clone());
        paths
    }

    pub fn map_script_path(&self) -> PathBuf {
        self.root.join(&self.map_script)
    }
}

/// How the map runtime process is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter command; the script path and arguments are appended.
    pub command: Vec<String>,

    /// Wall-clock limit for one runtime invocation in seconds.
    pub timeout_secs: u64,

    /// Truncate captured runtime stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: vec!["vinn".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 10_000_000,
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MapperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runtime.command.is_empty() || self.runtime.command[0].trim().is_empty() {
            return Err(anyhow!("runtime.command must be a non-empty array"));
        }
        if self.runtime.timeout_secs == 0 {
            return Err(anyhow!("runtime.timeout_secs must be > 0"));
        }
        if self.runtime.output_limit_bytes == 0 {
            return Err(anyhow!("runtime.output_limit_bytes must be > 0"));
        }
        if self.project.map_script.as_os_str().is_empty() {
            return Err(anyhow!("project.map_script must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MapperConfig::default()`.
pub fn load_config(path: &Path) -> Result<MapperConfig> {
    if !path.exists() {
        let cfg = MapperConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MapperConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MapperConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

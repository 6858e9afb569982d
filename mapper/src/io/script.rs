//! Temporary map scripts for inline map-function sources.
//!
//! The runtime loads map functions as HTML imports, so inline source is wrapped
//! with the value-module import before it is written out.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::core::handles::{MapFunctionHandle, ModuleToLoad};

/// A map script written to a uniquely named temporary file.
///
/// The file is removed by [`TemporaryMapScript::release`] or on drop,
/// whichever comes first.
#[derive(Debug)]
pub struct TemporaryMapScript {
    file: Option<NamedTempFile>,
}

impl TemporaryMapScript {
    pub fn new(js_source: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("map_script_")
            .suffix(".html")
            .tempfile()
            .context("create temporary map script")?;
        file.write_all(render_map_script(js_source).as_bytes())
            .with_context(|| format!("write map script {}", file.path().display()))?;
        file.flush()
            .with_context(|| format!("flush map script {}", file.path().display()))?;
        debug!(path = %file.path().display(), "materialized map script");
        Ok(Self { file: Some(file) })
    }

    /// Path of the script, `None` once released.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    /// Path of a script that has not been released yet.
    pub fn live_path(&self) -> Result<&Path> {
        self.path()
            .ok_or_else(|| anyhow!("map script already released"))
    }

    /// Delete the script. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(err) = file.close() {
                warn!(path = %path.display(), err = %err, "failed to remove map script");
            }
        }
    }
}

impl Drop for TemporaryMapScript {
    fn drop(&mut self) {
        self.release();
    }
}

/// Write every inline module of `handle` to a temporary map script.
///
/// Returns the handle with inline sources replaced by the script filenames,
/// plus the scripts. The filenames stay valid until the scripts are dropped.
pub fn materialize_inline_modules(
    handle: &MapFunctionHandle,
) -> Result<(MapFunctionHandle, Vec<TemporaryMapScript>)> {
    let mut scripts = Vec::new();
    let mut modules_to_load = Vec::with_capacity(handle.modules_to_load.len());
    for module in &handle.modules_to_load {
        match module {
            ModuleToLoad::Source(source) => {
                let script = TemporaryMapScript::new(source)?;
                modules_to_load.push(ModuleToLoad::Filename(script.live_path()?.to_path_buf()));
                scripts.push(script);
            }
            other => modules_to_load.push(other.clone()),
        }
    }
    let rewritten = MapFunctionHandle {
        modules_to_load,
        function_name: handle.function_name.clone(),
    };
    Ok((rewritten, scripts))
}

fn render_map_script(js_source: &str) -> String {
    format!(
        "\n<!DOCTYPE html>\n<link rel=\"import\" href=\"/perf_insights/value/value.html\">\n<script>\n{js_source}\n</script>\n"
    )
}

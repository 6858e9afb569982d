//! Trace handles backed by local files.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::debug;

use crate::core::handles::{OpenedTrace, TraceHandle};

/// A trace stored in a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileTraceHandle {
    path: PathBuf,
    canonical_url: String,
}

impl LocalFileTraceHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let absolute = std::path::absolute(&path).unwrap_or_else(|_| path.clone());
        let canonical_url = format!("file://{}", absolute.display());
        Self {
            path,
            canonical_url,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceHandle for LocalFileTraceHandle {
    fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    fn open(&self) -> Result<Option<Box<dyn OpenedTrace>>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "trace file not found");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("open trace {}", self.path.display()));
            }
        };
        let metadata = file
            .metadata()
            .with_context(|| format!("stat trace {}", self.path.display()))?;
        if !metadata.is_file() {
            debug!(path = %self.path.display(), "trace path is not a regular file");
            return Ok(None);
        }
        Ok(Some(Box::new(OpenedTraceFile {
            path: self.path.clone(),
            _file: file,
        })))
    }

    fn as_dict(&self) -> Value {
        json!({
            "type": "file_handle",
            "canonical_url": self.canonical_url,
        })
    }
}

/// Keeps the trace file open until dropped.
struct OpenedTraceFile {
    path: PathBuf,
    _file: File,
}

impl OpenedTrace for OpenedTraceFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

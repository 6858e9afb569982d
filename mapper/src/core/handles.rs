//! Handles that identify what is being mapped: the trace, the map function, and
//! the job that pairs them.
//!
//! Handles cross the process boundary as JSON descriptors (`as_dict`), so every
//! type here has a stable serialized shape.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A trace that can be opened for the duration of one mapping.
pub trait TraceHandle {
    /// Stable identifier for the trace (e.g. `file:///abs/path.json`).
    fn canonical_url(&self) -> &str;

    /// Open the trace. `Ok(None)` means the trace is not available.
    fn open(&self) -> Result<Option<Box<dyn OpenedTrace>>>;

    /// Serializable descriptor passed to the map runtime.
    fn as_dict(&self) -> Value;
}

/// An opened trace. Released when dropped.
pub trait OpenedTrace {
    /// Location the map runtime reads the trace from.
    fn path(&self) -> &Path;
}

/// One module the runtime must load before calling the map function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleToLoad {
    /// Module resolved by the runtime against its source paths.
    Href(String),
    /// Module stored in a local file.
    Filename(PathBuf),
    /// Inline map-function source, materialized to a temporary script before
    /// invocation.
    Source(String),
}

/// Identifies the map function to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFunctionHandle {
    pub modules_to_load: Vec<ModuleToLoad>,
    pub function_name: String,
}

impl MapFunctionHandle {
    pub fn new(modules_to_load: Vec<ModuleToLoad>, function_name: impl Into<String>) -> Self {
        Self {
            modules_to_load,
            function_name: function_name.into(),
        }
    }

    pub fn as_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether any module has to be materialized before the runtime can load it.
    pub fn has_inline_sources(&self) -> bool {
        self.modules_to_load
            .iter()
            .any(|module| matches!(module, ModuleToLoad::Source(_)))
    }
}

/// A map function paired with the metadata of one mapping run.
///
/// Passed through unchanged and attached to every failure produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub guid: String,
    pub map_function_handle: MapFunctionHandle,
}

impl Job {
    /// Create a job with a freshly generated guid.
    pub fn new(map_function_handle: MapFunctionHandle) -> Self {
        Self::with_guid(generate_guid(), map_function_handle)
    }

    pub fn with_guid(guid: impl Into<String>, map_function_handle: MapFunctionHandle) -> Self {
        Self {
            guid: guid.into(),
            map_function_handle,
        }
    }

    pub fn as_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn generate_guid() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect::<String>()
        .to_lowercase();
    format!("job_{timestamp}_{short_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_function_handle_dict_shape() {
        let handle = MapFunctionHandle::new(
            vec![
                ModuleToLoad::Href("/perf_insights/map.html".to_string()),
                ModuleToLoad::Filename(PathBuf::from("/tmp/map.html")),
            ],
            "mapThreads",
        );
        assert_eq!(
            handle.as_dict(),
            json!({
                "modules_to_load": [
                    {"href": "/perf_insights/map.html"},
                    {"filename": "/tmp/map.html"}
                ],
                "function_name": "mapThreads"
            })
        );
        assert!(!handle.has_inline_sources());
    }

    #[test]
    fn inline_sources_are_detected() {
        let handle = MapFunctionHandle::new(vec![ModuleToLoad::Source("x".to_string())], "f");
        assert!(handle.has_inline_sources());
    }

    #[test]
    fn generated_guids_differ() {
        let handle = MapFunctionHandle::new(Vec::new(), "f");
        let a = Job::new(handle.clone());
        let b = Job::new(handle);
        assert!(a.guid.starts_with("job_"));
        assert_ne!(a.guid, b.guid);
        assert_eq!(a.as_dict()["guid"], json!(a.guid));
    }
}

//! Collection of results and failures for one mapping call.

use serde_json::{Map, Value};

use crate::core::failure::Failure;

/// Append-only destination for mapping output.
///
/// A sink shared between concurrent mappings must provide its own append
/// safety; the mapper only ever appends.
pub trait ResultsSink {
    fn add_failure(&mut self, failure: Failure);
    fn add_results(&mut self, results: Value);
}

/// In-memory results sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapResults {
    results: Vec<Value>,
    failures: Vec<Failure>,
}

impl MapResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn had_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.failures.is_empty()
    }

    /// `{"results": [...], "failures": [...]}` with failures in dictionary form.
    pub fn as_dict(&self) -> Value {
        let mut dict = Map::new();
        dict.insert("results".to_string(), Value::Array(self.results.clone()));
        dict.insert(
            "failures".to_string(),
            Value::Array(
                self.failures
                    .iter()
                    .map(|failure| Value::Object(failure.as_dict()))
                    .collect(),
            ),
        );
        Value::Object(dict)
    }
}

impl ResultsSink for MapResults {
    fn add_failure(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    fn add_results(&mut self, results: Value) {
        self.results.push(results);
    }
}

//! Typed failure records produced while mapping a trace.
//!
//! Failures cross the process boundary as JSON dictionaries keyed by
//! `failure_type_name`. The name selects a [`FailureKind`] through a fixed
//! registry; names that are not registered resolve to [`FailureKind::Generic`]
//! while keeping the original name as the failure's category.

use serde_json::{Map, Value};

use crate::core::handles::{Job, MapFunctionHandle, TraceHandle};

/// Category used for failures raised by the mapper itself.
pub const GENERIC_TYPE_NAME: &str = "Error";
/// Stack recorded when no stack is available.
pub const UNKNOWN_STACK: &str = "Unknown stack";

const FAILURE_TYPE_NAME_KEY: &str = "failure_type_name";
const DESCRIPTION_KEY: &str = "description";
const STACK_KEY: &str = "stack";
const JOB_GUID_KEY: &str = "job_guid";
const MAP_FUNCTION_HANDLE_KEY: &str = "map_function_handle";
const TRACE_HANDLE_KEY: &str = "trace_handle";

/// Keys filled in from the mapping context rather than from the payload.
const CONTEXT_KEYS: [&str; 3] = [JOB_GUID_KEY, MAP_FUNCTION_HANDLE_KEY, TRACE_HANDLE_KEY];

/// Discriminator for failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The map function's modules could not be loaded.
    FunctionLoadingError,
    /// The modules loaded but did not define the requested function.
    FunctionNotDefinedError,
    /// The trace could not be imported by the runtime.
    TraceImportError,
    /// The map function threw while running.
    MapFunctionError,
    /// The map function returned without adding any results.
    NoResultsAddedError,
    /// Anything else, including failures raised by the mapper.
    Generic,
}

const REGISTRY: [(&str, FailureKind); 5] = [
    ("FunctionLoadingError", FailureKind::FunctionLoadingError),
    ("FunctionNotDefinedError", FailureKind::FunctionNotDefinedError),
    ("TraceImportError", FailureKind::TraceImportError),
    ("MapFunctionError", FailureKind::MapFunctionError),
    ("NoResultsAddedError", FailureKind::NoResultsAddedError),
];

impl FailureKind {
    /// Resolve a `failure_type_name`; unregistered names are [`FailureKind::Generic`].
    pub fn from_type_name(name: &str) -> Self {
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, kind)| *kind)
            .unwrap_or(FailureKind::Generic)
    }

    /// Registered name for this kind, `None` for [`FailureKind::Generic`].
    pub fn type_name(self) -> Option<&'static str> {
        REGISTRY
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
    }
}

/// A failure record decoded from a `MAP_FAILURE` line, before the mapping
/// context is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub fields: Map<String, Value>,
}

impl FailureRecord {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let kind = fields
            .get(FAILURE_TYPE_NAME_KEY)
            .and_then(Value::as_str)
            .map(FailureKind::from_type_name)
            .unwrap_or(FailureKind::Generic);
        Self { kind, fields }
    }
}

/// An immutable record describing one way a mapping failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    kind: FailureKind,
    job: Job,
    map_function_handle: MapFunctionHandle,
    trace_handle: Value,
    failure_type_name: String,
    description: String,
    stack: String,
    extra: Map<String, Value>,
}

impl Failure {
    pub fn new(
        job: &Job,
        map_function_handle: &MapFunctionHandle,
        trace_handle: &dyn TraceHandle,
        failure_type_name: impl Into<String>,
        description: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        let failure_type_name = failure_type_name.into();
        Self {
            kind: FailureKind::from_type_name(&failure_type_name),
            job: job.clone(),
            map_function_handle: map_function_handle.clone(),
            trace_handle: trace_handle.as_dict(),
            failure_type_name,
            description: description.into(),
            stack: stack.into(),
            extra: Map::new(),
        }
    }

    /// Generic mapper-side failure with an unknown stack.
    pub fn generic(
        job: &Job,
        map_function_handle: &MapFunctionHandle,
        trace_handle: &dyn TraceHandle,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            job,
            map_function_handle,
            trace_handle,
            GENERIC_TYPE_NAME,
            description,
            UNKNOWN_STACK,
        )
    }

    /// Rebuild a failure from its dictionary form plus the mapping context.
    ///
    /// Never fails: missing or non-string core fields take their defaults and
    /// unrecognized keys are kept in [`Failure::extra`]. A non-string core
    /// field is kept in [`Failure::extra`] too, so [`Failure::as_dict`] emits
    /// it unchanged.
    pub fn from_dict(
        fields: &Map<String, Value>,
        job: &Job,
        map_function_handle: &MapFunctionHandle,
        trace_handle: &dyn TraceHandle,
    ) -> Self {
        Self::from_record(
            FailureRecord::from_fields(fields.clone()),
            job,
            map_function_handle,
            trace_handle,
        )
    }

    pub fn from_record(
        record: FailureRecord,
        job: &Job,
        map_function_handle: &MapFunctionHandle,
        trace_handle: &dyn TraceHandle,
    ) -> Self {
        let FailureRecord { kind, mut fields } = record;
        let failure_type_name = take_string(&mut fields, FAILURE_TYPE_NAME_KEY)
            .unwrap_or_else(|| GENERIC_TYPE_NAME.to_string());
        let description = take_string(&mut fields, DESCRIPTION_KEY).unwrap_or_default();
        let stack =
            take_string(&mut fields, STACK_KEY).unwrap_or_else(|| UNKNOWN_STACK.to_string());
        for key in CONTEXT_KEYS {
            fields.remove(key);
        }
        Self {
            kind,
            job: job.clone(),
            map_function_handle: map_function_handle.clone(),
            trace_handle: trace_handle.as_dict(),
            failure_type_name,
            description,
            stack,
            extra: fields,
        }
    }

    /// Dictionary form, readable by [`Failure::from_dict`].
    pub fn as_dict(&self) -> Map<String, Value> {
        let mut dict = self.extra.clone();
        dict.entry(FAILURE_TYPE_NAME_KEY)
            .or_insert_with(|| Value::String(self.failure_type_name.clone()));
        dict.entry(DESCRIPTION_KEY)
            .or_insert_with(|| Value::String(self.description.clone()));
        dict.entry(STACK_KEY)
            .or_insert_with(|| Value::String(self.stack.clone()));
        dict.insert(
            JOB_GUID_KEY.to_string(),
            Value::String(self.job.guid.clone()),
        );
        dict.insert(
            MAP_FUNCTION_HANDLE_KEY.to_string(),
            self.map_function_handle.as_dict(),
        );
        dict.insert(TRACE_HANDLE_KEY.to_string(), self.trace_handle.clone());
        dict
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn map_function_handle(&self) -> &MapFunctionHandle {
        &self.map_function_handle
    }

    /// Descriptor of the trace being mapped when the failure occurred.
    pub fn trace_handle(&self) -> &Value {
        &self.trace_handle
    }

    /// Category name, e.g. `TraceImportError` or `Error`.
    pub fn failure_type_name(&self) -> &str {
        &self.failure_type_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Payload fields that are not part of the core record.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Remove `key` if it holds a string. Any other value stays in `fields`.
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !fields.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match fields.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

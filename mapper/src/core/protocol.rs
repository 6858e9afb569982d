//! Line-oriented protocol spoken by the map runtime on stdout.
//!
//! ```text
//! MAP_RESULTS: <json>    one results batch, forwarded as-is
//! MAP_FAILURE: <json>    one failure object with a `failure_type_name`
//! anything else          diagnostic text
//! ```
//!
//! A line that matches a protocol prefix but carries a bad payload is an error,
//! never a diagnostic.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::failure::FailureRecord;
use crate::error::ProtocolError;

static PROTOCOL_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^MAP_(FAILURE|RESULTS): (.+)$").unwrap());

/// One parsed unit of runtime output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Results(Value),
    Failure(FailureRecord),
    Diagnostic(String),
}

/// Parse runtime stdout into events, in order.
///
/// The iterator is lazy: events before a malformed line are yielded before the
/// error, so callers can keep what was routed so far.
pub fn parse_output(stdout: &str) -> impl Iterator<Item = Result<ProtocolEvent, ProtocolError>> + '_ {
    stdout
        .split('\n')
        .enumerate()
        .filter_map(|(index, line)| parse_line(index + 1, line).transpose())
}

/// Parse a single line. Returns `Ok(None)` for empty lines.
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<ProtocolEvent>, ProtocolError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Ok(None);
    }
    let Some(captures) = PROTOCOL_LINE_RE.captures(line) else {
        return Ok(Some(ProtocolEvent::Diagnostic(line.to_string())));
    };

    let tag = &captures[1];
    let payload: Value =
        serde_json::from_str(&captures[2]).map_err(|source| ProtocolError::InvalidJson {
            line: line_number,
            tag: tag.to_string(),
            source,
        })?;

    let event = match tag {
        "FAILURE" => ProtocolEvent::Failure(parse_failure(line_number, payload)?),
        _ => ProtocolEvent::Results(payload),
    };
    Ok(Some(event))
}

fn parse_failure(line_number: usize, payload: Value) -> Result<FailureRecord, ProtocolError> {
    let Value::Object(fields) = payload else {
        return Err(ProtocolError::MalformedFailure {
            line: line_number,
            reason: "payload is not a JSON object",
        });
    };
    if !fields
        .get("failure_type_name")
        .is_some_and(Value::is_string)
    {
        return Err(ProtocolError::MalformedFailure {
            line: line_number,
            reason: "missing string field failure_type_name",
        });
    }
    Ok(FailureRecord::from_fields(fields))
}

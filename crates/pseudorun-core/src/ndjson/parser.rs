//! Classification of a single stdout line.

use tracing::trace;

use super::types::{OutputEvent, StructuredLine};

/// Classify one line of compiler stdout (without its terminator).
///
/// Returns `None` for blank lines. Never fails: lines that are not a JSON
/// object with a recognised `type` are returned verbatim as output.
pub fn parse_line(line: &str) -> Option<OutputEvent> {
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<StructuredLine>(line) {
        Ok(structured) => Some(structured.into()),
        Err(e) => {
            trace!(error = %e, "Unstructured stdout line");
            Some(OutputEvent::output(line))
        }
    }
}

//! Message types for the compiler's stdout protocol.

use serde::Deserialize;

/// A classified line of compiler stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Program output, either from an `output` object or an unstructured line.
    Output { text: String },
    /// The program is waiting for a value on the input slot.
    InputRequest { prompt: String },
}

impl OutputEvent {
    pub fn output(text: impl Into<String>) -> Self {
        Self::Output { text: text.into() }
    }

    pub fn input_request(prompt: impl Into<String>) -> Self {
        Self::InputRequest {
            prompt: prompt.into(),
        }
    }
}

/// Structured line shapes. Unknown fields are ignored; an unknown `type` or a
/// missing payload field fails deserialization and the line is treated as text.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StructuredLine {
    Output { message: String },
    Input { prompt: String },
}

impl From<StructuredLine> for OutputEvent {
    fn from(line: StructuredLine) -> Self {
        match line {
            StructuredLine::Output { message } => Self::Output { text: message },
            StructuredLine::Input { prompt } => Self::InputRequest { prompt },
        }
    }
}

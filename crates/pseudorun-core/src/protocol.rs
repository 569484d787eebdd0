//! Wire protocol between browser clients and the gateway.
//!
//! ```text
//! Client ── raw source text ───────────────────────────► start a run
//!        ── {"type":"run","code":"..."} ───────────────► start a run
//!        ── {"type":"input","value":"..."} ────────────► answer a prompt
//!        ◄─ {"type":"output","message":"..."} ──────── program output
//!        ◄─ {"type":"input","prompt":"..."} ────────── program waits for input
//!        ◄─ {"type":"exit","code":0} ───────────────── program finished
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::ndjson::OutputEvent;

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Start a new run with the given source code.
    Run { code: String },
    /// Deliver a value to the running program's input slot.
    SubmitInput { value: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientEnvelope {
    Input {
        #[serde(deserialize_with = "scalar_as_string")]
        value: String,
    },
    Run {
        code: String,
    },
}

impl ClientRequest {
    /// Decode a client text frame.
    ///
    /// Structured envelopes are tried first; anything else is the source code
    /// of a new run. Source that is itself a valid `input` envelope is therefore
    /// routed as input, so clients should prefer the `run` envelope.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<ClientEnvelope>(text) {
            Ok(ClientEnvelope::Input { value }) => Self::SubmitInput { value },
            Ok(ClientEnvelope::Run { code }) => Self::Run { code },
            Err(_) => Self::Run {
                code: text.to_string(),
            },
        }
    }
}

/// Accept `"5"`, `5` or `true` for input values; browsers are not consistent.
fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "input value must be a scalar, got {other}"
        ))),
    }
}

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Output { message: String },
    Input { prompt: String },
    /// `code` is `null` when the process was killed by a signal.
    Exit { code: Option<i32> },
}

impl ServerMessage {
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<OutputEvent> for ServerMessage {
    fn from(event: OutputEvent) -> Self {
        match event {
            OutputEvent::Output { text } => Self::Output { message: text },
            OutputEvent::InputRequest { prompt } => Self::Input { prompt },
        }
    }
}

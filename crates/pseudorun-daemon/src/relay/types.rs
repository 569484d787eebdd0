//! Relay module types.

use std::path::PathBuf;
use std::time::Duration;

use pseudorun_core::config::CompilerConfig;
use pseudorun_core::ndjson::OutputEvent;
use pseudorun_core::protocol::ServerMessage;

use crate::input::InputChannelError;
use crate::subprocess::{LaunchError, LaunchSpec};

/// Marker prepended to stderr lines.
pub const STDERR_MARKER: &str = "[stderr] ";
/// Marker prepended to launch and relay failures.
pub const ERROR_MARKER: &str = "[error] ";
/// Marker prepended to stdout/stderr read failures.
pub const STREAM_ERROR_MARKER: &str = "[stream error] ";

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No run has been started yet.
    #[default]
    Idle,
    /// A compiler process is alive.
    Running,
    /// The last run is over; a new `start` is required.
    Terminated,
}

/// Event emitted by a session relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Output { text: String },
    InputRequest { prompt: String },
    /// The process exited. `None` when it was killed by a signal. Terminal.
    Exited { code: Option<i32> },
    /// The run could not be started. Terminal.
    Failed { message: String },
}

impl RelayEvent {
    pub fn output(text: impl Into<String>) -> Self {
        Self::Output { text: text.into() }
    }

    /// Whether this is the last event of a run.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed { .. })
    }
}

impl From<OutputEvent> for RelayEvent {
    fn from(event: OutputEvent) -> Self {
        match event {
            OutputEvent::Output { text } => Self::Output { text },
            OutputEvent::InputRequest { prompt } => Self::InputRequest { prompt },
        }
    }
}

impl From<RelayEvent> for ServerMessage {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Output { text } => Self::Output { message: text },
            RelayEvent::InputRequest { prompt } => Self::Input { prompt },
            RelayEvent::Exited { code } => Self::Exit { code },
            RelayEvent::Failed { message } => Self::Output {
                message: format!("{ERROR_MARKER}{message}"),
            },
        }
    }
}

/// Configuration shared by every session relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How to launch the compiler.
    pub launch: LaunchSpec,
    /// File the submitted source code is written to.
    pub source_path: PathBuf,
    /// Upper bound for a single stdout/stderr line.
    pub max_line_bytes: usize,
    /// Grace period between SIGINT and SIGKILL when a run is cancelled.
    pub terminate_timeout: Duration,
}

impl RelayConfig {
    pub fn from_compiler_config(config: &CompilerConfig) -> Self {
        let mut launch = LaunchSpec::new(&config.executable).with_args(config.args.clone());
        launch.working_directory.clone_from(&config.working_directory);
        Self {
            launch,
            source_path: config.source_path(),
            max_line_bytes: config.max_line_bytes,
            terminate_timeout: config.terminate_timeout(),
        }
    }
}

/// Errors from relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Input(#[from] InputChannelError),

    #[error("Failed to write source file {}: {source}", path.display())]
    SourceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No program is running in session {session_id}")]
    NoActiveProcess { session_id: String },

    #[error("Relay task failed: {0}")]
    Task(String),
}

//! Configuration resolution for pseudorun.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/pseudorun/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`PSEUDORUN_*`)
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a file only needs the fields it changes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ndjson::DEFAULT_MAX_LINE_BYTES;

/// Complete pseudorun configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Largest client frame accepted by the WebSocket endpoint.
    pub max_message_bytes: usize,
    /// Plain text frame sent when a client connects.
    pub greeting: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_bytes: 1024 * 1024,
            greeting: "Connected to Compiler Server".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How the external compiler is launched and where its files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler binary; bare names are looked up on `PATH`.
    pub executable: PathBuf,
    /// Extra arguments passed to the compiler.
    pub args: Vec<String>,
    /// Working directory; defaults to the directory containing the executable.
    pub working_directory: Option<PathBuf>,
    /// Directory holding the source and input slot files.
    pub tests_dir: PathBuf,
    /// Override for the source file (default `<tests_dir>/input.txt`).
    pub source_file: Option<PathBuf>,
    /// Override for the input slot (default `<tests_dir>/input_queue.txt`).
    pub input_file: Option<PathBuf>,
    /// Maximum number of compiler processes alive at once.
    pub max_processes: usize,
    /// Seconds to wait after SIGINT before killing the compiler.
    pub terminate_timeout_secs: u64,
    pub max_line_bytes: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("pseudocode_compiler"),
            args: Vec::new(),
            working_directory: None,
            tests_dir: PathBuf::from("tests"),
            source_file: None,
            input_file: None,
            // The compiler reads fixed file paths, so runs cannot overlap.
            max_processes: 1,
            terminate_timeout_secs: 5,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl CompilerConfig {
    /// File the submitted source code is written to.
    pub fn source_path(&self) -> PathBuf {
        self.source_file
            .clone()
            .unwrap_or_else(|| self.tests_dir.join("input.txt"))
    }

    /// File the compiler polls for interactive input.
    pub fn input_path(&self) -> PathBuf {
        self.input_file
            .clone()
            .unwrap_or_else(|| self.tests_dir.join("input_queue.txt"))
    }

    pub const fn terminate_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_values(&mut merged, load_config_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        merge_values(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pseudorun").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`. Objects merge per key; any other
/// value replaces the base value.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    fn parsed<T: std::str::FromStr>(key: &str, val: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        val.parse()
            .map_err(|e| Error::Config(format!("Invalid value for {key}: {val:?} ({e})")))
    }

    if let Some(val) = lookup("PSEUDORUN_ADDR") {
        config.server.addr = parsed("PSEUDORUN_ADDR", &val)?;
    }
    if let Some(val) = lookup("PSEUDORUN_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(val) = lookup("PSEUDORUN_COMPILER") {
        config.compiler.executable = PathBuf::from(val);
    }
    if let Some(val) = lookup("PSEUDORUN_WORKING_DIR") {
        config.compiler.working_directory = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PSEUDORUN_TESTS_DIR") {
        config.compiler.tests_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("PSEUDORUN_MAX_PROCESSES") {
        config.compiler.max_processes = parsed("PSEUDORUN_MAX_PROCESSES", &val)?;
    }
    if let Some(val) = lookup("PSEUDORUN_TERMINATE_TIMEOUT") {
        config.compiler.terminate_timeout_secs = parsed("PSEUDORUN_TERMINATE_TIMEOUT", &val)?;
    }
    Ok(())
}

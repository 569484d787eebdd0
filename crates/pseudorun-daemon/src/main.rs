//! pseudorun daemon
//!
//! Serves the WebSocket gateway that relays interactive pseudocode compiler
//! sessions to browser clients.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use pseudorun_core::Config;
use pseudorun_core::config::load_config;
use pseudorun_daemon::server::{GatewayState, serve};

#[derive(Parser, Debug)]
#[command(name = "pseudorun-daemon")]
#[command(version, about = "pseudorun daemon - interactive compiler session relay")]
struct Args {
    /// Path to a JSON settings file, layered over the global settings.
    #[arg(long, env = "PSEUDORUN_CONFIG")]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to the compiler executable
    #[arg(long)]
    compiler: Option<PathBuf>,

    /// Extra argument passed to the compiler (repeatable)
    #[arg(long = "compiler-arg", allow_hyphen_values = true)]
    compiler_args: Vec<String>,

    /// Working directory for the compiler (defaults to the executable's directory)
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Directory holding the source and input files
    #[arg(long)]
    tests_dir: Option<PathBuf>,

    /// Explicit path for the submitted source file
    #[arg(long)]
    source_file: Option<PathBuf>,

    /// Explicit path for the interactive input file
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Maximum concurrent compiler processes across all connections
    #[arg(long)]
    max_processes: Option<usize>,

    /// Seconds to wait for graceful compiler shutdown before SIGKILL.
    #[arg(long)]
    terminate_timeout: Option<u64>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PSEUDORUN_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Layer CLI flags over the resolved configuration.
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.addr = addr;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        let compiler = &mut config.compiler;
        if let Some(executable) = self.compiler {
            compiler.executable = executable;
        }
        if !self.compiler_args.is_empty() {
            compiler.args = self.compiler_args;
        }
        if self.working_dir.is_some() {
            compiler.working_directory = self.working_dir;
        }
        if let Some(dir) = self.tests_dir {
            compiler.tests_dir = dir;
        }
        if self.source_file.is_some() {
            compiler.source_file = self.source_file;
        }
        if self.input_file.is_some() {
            compiler.input_file = self.input_file;
        }
        if let Some(max) = self.max_processes {
            compiler.max_processes = max;
        }
        if let Some(secs) = self.terminate_timeout {
            compiler.terminate_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_json = args.log_json;

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let log_filter = format!("pseudorun_daemon={}", config.server.log_level);
    pseudorun_core::tracing_init::init_tracing(&log_filter, log_json);

    if config.compiler.max_processes == 0 {
        anyhow::bail!("max_processes must be at least 1");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        compiler = %config.compiler.executable.display(),
        source = %config.compiler.source_path().display(),
        input = %config.compiler.input_path().display(),
        max_processes = config.compiler.max_processes,
        "Starting pseudorun-daemon"
    );

    let state = GatewayState::from_config(&config);
    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so compiler processes cannot notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = serve(listener, state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

//! Shared fixtures: a scripted fake compiler run through `/bin/sh`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use pseudorun_core::Config;
use pseudorun_core::config::CompilerConfig;
use pseudorun_daemon::input::FileInputChannel;
use pseudorun_daemon::relay::{RelayConfig, RelayEvent, SessionRelay};
use pseudorun_daemon::subprocess::ProcessLauncher;

/// Prints `1`, asks for `x`, then echoes whatever lands in the input slot.
pub const INTERACTIVE: &str = r#"
echo '{"type":"output","message":"1"}'
echo '{"type":"input","prompt":"x?"}'
i=0
while [ ! -s tests/input_queue.txt ]; do
  i=$((i + 1))
  if [ "$i" -gt 400 ]; then
    echo "timed out waiting for input" >&2
    exit 3
  fi
  sleep 0.05
done
read -r value < tests/input_queue.txt
printf '{"type":"output","message":"%s"}\n' "$value"
exit 0
"#;

/// Asks for `x`, then idles without ever reading the input slot.
pub const PROMPT_AND_WAIT: &str = r#"
echo '{"type":"input","prompt":"x?"}'
sleep 10
"#;

/// Echoes the submitted source file back as one output line.
pub const ECHO_SOURCE: &str = r#"
printf '{"type":"output","message":"%s"}\n' "$(cat tests/input.txt)"
"#;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("compiler.sh"), script).unwrap();
        Self { dir }
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join("tests").join("input.txt")
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join("tests").join("input_queue.txt")
    }

    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            executable: "/bin/sh".into(),
            args: vec![self.dir.path().join("compiler.sh").display().to_string()],
            working_directory: Some(self.dir.path().to_path_buf()),
            tests_dir: self.dir.path().join("tests"),
            max_processes: 1,
            terminate_timeout_secs: 1,
            ..Default::default()
        }
    }

    pub fn config(&self) -> Config {
        Config {
            compiler: self.compiler_config(),
            ..Default::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig::from_compiler_config(&self.compiler_config());
        config.terminate_timeout = Duration::from_millis(300);
        config
    }

    /// A relay over the on-disk input slot with its own single-slot pool.
    pub fn relay(&self) -> (SessionRelay, mpsc::Receiver<RelayEvent>) {
        self.relay_with(self.relay_config(), Arc::new(ProcessLauncher::new(1)))
    }

    pub fn relay_with(
        &self,
        config: RelayConfig,
        launcher: Arc<ProcessLauncher>,
    ) -> (SessionRelay, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let relay = SessionRelay::new(
            "test-session",
            Arc::new(config),
            launcher,
            Arc::new(FileInputChannel::new(self.input_path())),
            tx,
        );
        (relay, rx)
    }
}

pub async fn next_event(rx: &mut mpsc::Receiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("relay event channel closed")
}

/// Collect events up to and including the terminal one.
pub async fn events_until_exit(rx: &mut mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

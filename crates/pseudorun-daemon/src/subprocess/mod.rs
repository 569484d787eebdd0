//! Compiler process launching.

pub mod launcher;

pub use launcher::{
    LaunchError, LaunchSpec, ProcessHandle, ProcessLauncher, ProcessSlot, resolve_executable,
};

//! pseudorun Daemon Library
//!
//! Core functionality for the pseudorun daemon:
//! - Compiler process launching with a bounded process pool
//! - File-backed input slot the compiler polls for interactive input
//! - Per-connection session relay (stdout framing, input routing, lifecycle)
//! - WebSocket gateway for browser clients

pub mod input;
pub mod relay;
pub mod server;
pub mod subprocess;

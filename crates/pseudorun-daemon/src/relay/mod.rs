//! Relay module: bridges one compiler run with one client connection.
//!
//! This is the "glue" that connects:
//! - ProcessLauncher (spawn, stdout/stderr, exit)
//! - OutputCodec (stdout bytes → classified events)
//! - InputChannel (client input → slot the compiler polls)

mod pipeline;
mod types;

pub use pipeline::SessionRelay;
pub use types::*;

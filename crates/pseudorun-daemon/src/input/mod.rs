//! Interactive input delivery.
//!
//! The compiler cannot read interactive input from a live stdin pipe; it polls
//! a single-value slot instead. The relay only ever writes to the slot, and a
//! write replaces whatever value was there (last write wins, no acknowledgement).

mod file;
mod memory;

use std::path::PathBuf;

pub use file::FileInputChannel;
pub use memory::MemoryInputChannel;

/// Write side of the compiler's input slot.
pub trait InputChannel: Send + Sync {
    /// Clear the slot to an empty value. Called when a session starts.
    fn reset(&self) -> Result<(), InputChannelError>;

    /// Replace the slot with `value` followed by a newline.
    ///
    /// Returns once the value is durable. Does not wait for the compiler to
    /// consume it.
    fn write(&self, value: &str) -> Result<(), InputChannelError>;
}

/// Errors from writing the input slot.
#[derive(Debug, thiserror::Error)]
pub enum InputChannelError {
    #[error("Failed to write input slot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

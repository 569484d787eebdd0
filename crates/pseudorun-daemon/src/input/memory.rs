//! In-process input slot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{InputChannel, InputChannelError};

/// Input slot kept in memory, recording every write.
///
/// Useful when the compiler is replaced by an in-process stand-in.
#[derive(Debug, Default)]
pub struct MemoryInputChannel {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: String,
    history: Vec<String>,
    resets: usize,
}

impl MemoryInputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current slot contents, including the newline terminator.
    pub fn current(&self) -> String {
        self.lock().current.clone()
    }

    /// Every value written since creation, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }
}

impl InputChannel for MemoryInputChannel {
    fn reset(&self) -> Result<(), InputChannelError> {
        let mut state = self.lock();
        state.current.clear();
        state.resets += 1;
        Ok(())
    }

    fn write(&self, value: &str) -> Result<(), InputChannelError> {
        let mut state = self.lock();
        state.current = format!("{value}\n");
        state.history.push(value.to_string());
        Ok(())
    }
}

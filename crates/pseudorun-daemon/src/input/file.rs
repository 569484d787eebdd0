//! File-backed input slot.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{InputChannel, InputChannelError};

/// Input slot stored in a single file the compiler polls.
///
/// Every write goes to a sibling temporary file which is synced and then
/// renamed over the slot, so a reader never sees a partially written value.
#[derive(Debug, Clone)]
pub struct FileInputChannel {
    path: PathBuf,
}

impl FileInputChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("input"), OsString::from);
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn replace(&self, contents: &[u8]) -> Result<(), InputChannelError> {
        let io_err = |source| InputChannelError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let staging = self.staging_path();
        let mut file = File::create(&staging).map_err(io_err)?;
        file.write_all(contents).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&staging, &self.path).map_err(io_err)
    }
}

impl InputChannel for FileInputChannel {
    fn reset(&self) -> Result<(), InputChannelError> {
        debug!(path = %self.path.display(), "Clearing input slot");
        self.replace(b"")
    }

    fn write(&self, value: &str) -> Result<(), InputChannelError> {
        debug!(path = %self.path.display(), len = value.len(), "Writing input slot");
        let mut contents = String::with_capacity(value.len() + 1);
        contents.push_str(value);
        contents.push('\n');
        self.replace(contents.as_bytes())
    }
}

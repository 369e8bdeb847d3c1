//! Spool-file task queue binding.
//!
//! The engine's remote strategy only needs "submit a descriptor, get an
//! acknowledgment". This binding appends one JSON line per task to a spool
//! file that an external worker fleet consumes; the broker side is out of
//! scope here.

use oceantiler::scheduler::{QueueError, TaskDescriptor, TaskQueue};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends serialized task descriptors to a JSON-lines file.
pub struct SpoolQueue {
    file: Mutex<File>,
    path: PathBuf,
}

impl SpoolQueue {
    /// Opens (or creates) the spool file in append mode.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskQueue for SpoolQueue {
    async fn submit(&self, descriptor: TaskDescriptor) -> Result<(), QueueError> {
        let line = serde_json::to_string(&descriptor)
            .map_err(|e| QueueError::new(format!("descriptor serialization failed: {}", e)))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| QueueError::new("spool file lock poisoned"))?;
        writeln!(file, "{}", line)
            .map_err(|e| QueueError::new(format!("spool write failed: {}", e)))
    }
}

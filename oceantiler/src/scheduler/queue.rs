//! External task queue interface.
//!
//! The remote dispatch strategy hands each tile to an out-of-process worker
//! fleet through this interface. The broker itself is out of scope: the
//! scheduler only needs "submit a descriptor, get an acknowledgment" - no
//! result is ever awaited.

use crate::config::RunConfig;
use crate::grid::{TileCoord, TileWindow};
use crate::pipeline::TileTask;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;

/// Everything an out-of-process worker needs to run one tile's pipeline:
/// the tile's identity and window plus the pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub coord: TileCoord,
    pub window: TileWindow,
    pub source: PathBuf,
    pub db_name: String,
    pub tile_table: String,
    pub contour_table: String,
    pub thresholds: Vec<u8>,
    pub contour_interval: u32,
    pub vert_exag: f64,
    pub simplify_tolerance: f64,
    pub clipfile: Option<PathBuf>,
    pub copy_output_dir: Option<PathBuf>,
}

impl TaskDescriptor {
    pub fn from_task(config: &RunConfig, task: &TileTask) -> Self {
        Self {
            coord: task.coord,
            window: task.window,
            source: config.source.clone(),
            db_name: config.db_name.clone(),
            tile_table: config.tile_table.clone(),
            contour_table: config.contour_table.clone(),
            thresholds: config.thresholds.clone(),
            contour_interval: config.contour_interval,
            vert_exag: config.vert_exag,
            simplify_tolerance: config.simplify_tolerance,
            clipfile: config.clipfile.clone(),
            copy_output_dir: config.copy_output_dir.clone(),
        }
    }
}

/// Submission failure reported by a queue binding.
#[derive(Debug, Clone)]
pub struct QueueError {
    pub message: String,
}

impl QueueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for QueueError {}

/// Capability to enqueue a tile task for out-of-process execution.
pub trait TaskQueue: Send + Sync + 'static {
    /// Submits a descriptor; resolves once the queue has acknowledged it.
    fn submit(
        &self,
        descriptor: TaskDescriptor,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{tile_window, GridParams};

    #[test]
    fn test_descriptor_roundtrip() {
        let config = RunConfig::new("/data/bathy.tif", "ocean-tiles");
        let params = GridParams {
            src_width: 4096,
            src_height: 4096,
            tile_buffer_px: 8,
            magnifier: 4,
        };
        let coord = TileCoord { zoom: 2, col: 3, row: 1 };
        let task = TileTask {
            coord,
            window: tile_window(coord, &params).unwrap(),
        };

        let descriptor = TaskDescriptor::from_task(&config, &task);
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: TaskDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(back, descriptor);
        assert_eq!(back.coord, coord);
        assert_eq!(back.db_name, "ocean-tiles");
    }
}

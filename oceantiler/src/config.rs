//! Run configuration.
//!
//! [`RunConfig`] is the plain options struct the engine consumes; building
//! it from command-line arguments is the CLI's job. Validation happens once,
//! before any tile is dispatched: configuration errors are fatal and never
//! reach the scheduler loop.

use std::path::PathBuf;
use thiserror::Error;

/// Multiplier for CPU count when sizing the local worker pool.
///
/// Tile pipelines are dominated by blocking external-process calls, not
/// in-process CPU work, so the pool oversubscribes the cores.
pub const WORKER_CPU_MULTIPLIER: usize = 2;

/// Fallback CPU count when detection fails.
pub const FALLBACK_CPU_COUNT: usize = 8;

/// Default threshold percentages applied to the shaded raster.
pub const DEFAULT_THRESHOLDS: [u8; 5] = [20, 50, 70, 80, 90];

/// Default contour interval in source elevation units.
pub const DEFAULT_CONTOUR_INTERVAL: u32 = 1000;

/// Default geometry simplification tolerance for destination appends.
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 1000.0;

/// Deepest supported pyramid level; level `z` has `4^z` tiles.
pub const MAX_ZOOM: u8 = 30;

/// Computes the default local pool size: `cpus * WORKER_CPU_MULTIPLIER`.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_CPU_COUNT);
    cpus * WORKER_CPU_MULTIPLIER
}

/// How tile pipelines are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Bounded in-process worker pool; the scheduler waits for every tile of
    /// a zoom level to finish before moving on.
    LocalPool { workers: usize },

    /// Hand each tile to an external task queue; only the enqueue
    /// acknowledgment is awaited and tiles are reported as "scheduled".
    RemoteQueue,
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        Self::LocalPool {
            workers: default_worker_count(),
        }
    }
}

/// Configuration for one pyramid run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Source raster path.
    pub source: PathBuf,

    /// Destination database name.
    pub db_name: String,

    /// Optional clip boundary (vector file); enables the clip stages.
    pub clipfile: Option<PathBuf>,

    /// Lowest zoom level to generate.
    pub min_zoom: u8,

    /// Highest zoom level to generate (inclusive).
    pub max_zoom: u8,

    /// Buffer margin in output pixels; 0 disables buffering.
    pub tile_buffer: u32,

    /// Processing/output resolution ratio; higher keeps more detail per tile.
    pub magnifier: u32,

    /// Vertical exaggeration passed to the shading stage.
    pub vert_exag: f64,

    /// Ordered threshold percentages for binarizing the shaded raster.
    pub thresholds: Vec<u8>,

    /// Contour interval; 0 disables the contour stages.
    pub contour_interval: u32,

    /// Destination table for polygonized tiles (shared across zoom levels,
    /// rows tagged with a zoom column).
    pub tile_table: String,

    /// Destination table for the contour side-channel.
    pub contour_table: String,

    /// Geometry simplification tolerance used on append.
    pub simplify_tolerance: f64,

    /// Drop destination tables before dispatch begins.
    pub clear_tables: bool,

    /// Execution strategy.
    pub dispatch: DispatchStrategy,

    /// Console/log verbosity (count of `-v` flags).
    pub verbosity: u8,

    /// Copy each tile's polygonized artifact into this directory.
    pub copy_output_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Creates a configuration with the standard defaults.
    pub fn new(source: impl Into<PathBuf>, db_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            db_name: db_name.into(),
            clipfile: None,
            min_zoom: 0,
            max_zoom: 6,
            tile_buffer: 8,
            magnifier: 4,
            vert_exag: 20.0,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            contour_interval: DEFAULT_CONTOUR_INTERVAL,
            tile_table: "bathy".to_string(),
            contour_table: "contour".to_string(),
            simplify_tolerance: DEFAULT_SIMPLIFY_TOLERANCE,
            clear_tables: false,
            dispatch: DispatchStrategy::default(),
            verbosity: 0,
            copy_output_dir: None,
        }
    }

    /// Sets the zoom range (builder pattern).
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Sets the buffer margin.
    pub fn with_tile_buffer(mut self, buffer: u32) -> Self {
        self.tile_buffer = buffer;
        self
    }

    /// Sets the magnifier.
    pub fn with_magnifier(mut self, magnifier: u32) -> Self {
        self.magnifier = magnifier;
        self
    }

    /// Sets the dispatch strategy.
    pub fn with_dispatch(mut self, dispatch: DispatchStrategy) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the clip boundary file.
    pub fn with_clipfile(mut self, clipfile: impl Into<PathBuf>) -> Self {
        self.clipfile = Some(clipfile.into());
        self
    }

    /// Sets the threshold list.
    pub fn with_thresholds(mut self, thresholds: Vec<u8>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Validates the configuration. Called by the scheduler before any
    /// dispatch; a failure here aborts the whole run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_zoom > self.max_zoom {
            return Err(ConfigError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(ConfigError::ZoomTooDeep {
                requested: self.max_zoom,
            });
        }
        if !self.source.exists() {
            return Err(ConfigError::SourceMissing {
                path: self.source.clone(),
            });
        }
        if let Some(clip) = &self.clipfile {
            if !clip.exists() {
                return Err(ConfigError::ClipfileMissing { path: clip.clone() });
            }
        }
        if self.thresholds.is_empty() {
            return Err(ConfigError::EmptyThresholds);
        }
        if self.magnifier == 0 {
            return Err(ConfigError::InvalidMagnifier);
        }
        if let DispatchStrategy::LocalPool { workers } = self.dispatch {
            if workers == 0 {
                return Err(ConfigError::EmptyWorkerPool);
            }
        }
        Ok(())
    }
}

/// Fatal configuration problems, surfaced before any dispatch begins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid zoom range: min {min} exceeds max {max}")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("zoom level {requested} exceeds the supported maximum of {max}", max = MAX_ZOOM)]
    ZoomTooDeep { requested: u8 },

    #[error("source raster does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("clip boundary file does not exist: {path}")]
    ClipfileMissing { path: PathBuf },

    #[error("threshold list must not be empty")]
    EmptyThresholds,

    #[error("magnifier must be at least 1")]
    InvalidMagnifier,

    #[error("local worker pool must have at least one worker")]
    EmptyWorkerPool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new("/tmp/src.tif", "ocean-tiles");

        assert_eq!(config.min_zoom, 0);
        assert_eq!(config.max_zoom, 6);
        assert_eq!(config.tile_buffer, 8);
        assert_eq!(config.magnifier, 4);
        assert_eq!(config.thresholds, vec![20, 50, 70, 80, 90]);
        assert_eq!(config.contour_interval, 1000);
        assert_eq!(config.tile_table, "bathy");
        assert_eq!(config.contour_table, "contour");
        assert!(!config.clear_tables);
    }

    #[test]
    fn test_invalid_zoom_range() {
        let config = RunConfig::new("/tmp/src.tif", "db").with_zoom_range(5, 2);

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidZoomRange { min: 5, max: 2 })
        );
    }

    #[test]
    fn test_zoom_depth_guard() {
        let config = RunConfig::new("/tmp/src.tif", "db").with_zoom_range(0, 31);

        assert_eq!(
            config.validate(),
            Err(ConfigError::ZoomTooDeep { requested: 31 })
        );
    }

    #[test]
    fn test_missing_source() {
        let config = RunConfig::new("/definitely/not/here.tif", "db");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::SourceMissing { .. })
        ));
    }

    #[test]
    fn test_missing_clipfile() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.tif");
        std::fs::write(&source, b"").unwrap();

        let config =
            RunConfig::new(&source, "db").with_clipfile(dir.path().join("absent.shp"));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ClipfileMissing { .. })
        ));
    }

    #[test]
    fn test_empty_thresholds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.tif");
        std::fs::write(&source, b"").unwrap();

        let config = RunConfig::new(&source, "db").with_thresholds(vec![]);

        assert_eq!(config.validate(), Err(ConfigError::EmptyThresholds));
    }

    #[test]
    fn test_valid_config_passes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.tif");
        std::fs::write(&source, b"").unwrap();

        let config = RunConfig::new(&source, "db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_worker_count_positive() {
        assert!(default_worker_count() >= WORKER_CPU_MULTIPLIER);
    }
}

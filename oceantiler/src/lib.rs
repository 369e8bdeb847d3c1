//! Oceantiler - bathymetry tile pyramid generation.
//!
//! Partitions a large raster into a tile pyramid (each zoom level a
//! `2^z x 2^z` grid) and runs every tile through a multi-stage geospatial
//! pipeline - subset, optional resample/clip, hillshade, threshold,
//! polygonize, persist - appending results into spatial destination tables.
//!
//! The raster and vector transformations themselves are external utilities
//! (GDAL, ImageMagick, PostGIS tooling) invoked as opaque stages; this crate
//! is the engine around them:
//!
//! - [`grid`] - pure window arithmetic mapping tiles onto the source raster
//! - [`pipeline`] - the declarative stage chain and the per-tile runner with
//!   its scoped workspace and persist retry
//! - [`scheduler`] - zoom-loop orchestration over a bounded local pool or an
//!   external task queue, with progress tracking and graceful interruption
//!
//! # Example
//!
//! ```ignore
//! use oceantiler::config::RunConfig;
//! use oceantiler::exec::ProcessRunner;
//! use oceantiler::pipeline::PipelineRunner;
//! use oceantiler::raster::GdalRasterProbe;
//! use oceantiler::scheduler::{LocalPool, ProgressCounter, Scheduler};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Arc::new(RunConfig::new("bathy.tif", "ocean-tiles"));
//! let cancel = CancellationToken::new();
//! let commands = Arc::new(ProcessRunner::new(config.verbosity));
//! let progress = Arc::new(ProgressCounter::new("processed"));
//! let runner = Arc::new(PipelineRunner::new(
//!     Arc::clone(&config),
//!     Arc::clone(&commands),
//!     cancel.clone(),
//! ));
//! let pool = LocalPool::new(runner, 8, Arc::clone(&progress));
//! let scheduler = Scheduler::new(
//!     config, pool, GdalRasterProbe::new(), commands, progress, cancel,
//! );
//! let summary = scheduler.run().await?;
//! ```

pub mod config;
pub mod exec;
pub mod grid;
pub mod logging;
pub mod pipeline;
pub mod raster;
pub mod scheduler;
pub mod store;

/// Version of the oceantiler library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

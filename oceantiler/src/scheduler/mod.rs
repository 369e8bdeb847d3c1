//! Pyramid scheduling and orchestration.
//!
//! The scheduler walks the configured zoom range in ascending order, one
//! level at a time:
//!
//! ```text
//! Init -> ClearTables? -> for each zoom:
//!     Enumerate -> Dispatch -> AwaitZoomCompletion -> ReportZoom
//! -> Done
//! ```
//!
//! A level's dispatch fully drains before the next level starts, so table
//! clearing and zoom boundaries never race in-flight writers. An operator
//! interrupt stops new dispatch, lets in-flight tiles finish and surfaces a
//! distinct [`RunOutcome::Interrupted`] rather than an error.

mod dispatch;
mod progress;
mod queue;

pub use dispatch::{DispatchError, Dispatcher, LocalPool, RemoteQueue};
pub use progress::ProgressCounter;
pub use queue::{QueueError, TaskDescriptor, TaskQueue};

use crate::config::{ConfigError, RunConfig};
use crate::exec::{CommandError, CommandRunner};
use crate::grid::{tile_window, GridError, GridParams, TileCoord};
use crate::pipeline::TileTask;
use crate::raster::{ProbeError, RasterProbe};
use crate::store::SpatialStore;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured zoom level drained.
    Completed,
    /// An operator interrupt stopped dispatch early. Not an error.
    Interrupted,
}

/// Per-zoom accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoomReport {
    pub zoom: u8,
    /// Tiles handed to the dispatcher (equals `total` unless interrupted).
    pub dispatched: u64,
    /// Tiles in the level: `4^zoom`.
    pub total: u64,
}

/// Result of a whole run.
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub zooms: Vec<ZoomReport>,
}

/// Fatal scheduler errors. Tile-level failures are never fatal; they are
/// absorbed by the dispatcher and only reflected in progress accounting.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to probe source raster: {0}")]
    Probe(#[from] ProbeError),

    #[error("failed to clear destination tables: {0}")]
    ClearTables(#[source] CommandError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Orchestrates one pyramid run against a dispatcher, a raster probe and a
/// command runner (the latter only for table clearing).
pub struct Scheduler<D, P, R>
where
    D: Dispatcher,
    P: RasterProbe,
    R: CommandRunner,
{
    config: Arc<RunConfig>,
    dispatcher: D,
    probe: P,
    commands: Arc<R>,
    store: SpatialStore,
    progress: Arc<ProgressCounter>,
    cancel: CancellationToken,
}

impl<D, P, R> Scheduler<D, P, R>
where
    D: Dispatcher,
    P: RasterProbe,
    R: CommandRunner,
{
    pub fn new(
        config: Arc<RunConfig>,
        dispatcher: D,
        probe: P,
        commands: Arc<R>,
        progress: Arc<ProgressCounter>,
        cancel: CancellationToken,
    ) -> Self {
        let store = SpatialStore::new(&config.db_name);
        Self {
            config,
            dispatcher,
            probe,
            commands,
            store,
            progress,
            cancel,
        }
    }

    /// Runs the configured zoom range to completion or interruption.
    pub async fn run(&self) -> Result<RunSummary, SchedulerError> {
        self.config.validate()?;

        // The only interaction with the source raster at scheduling time:
        // a read-only dimension lookup.
        let size = self.probe.probe(&self.config.source).await?;
        info!(
            source = %self.config.source.display(),
            width = size.width,
            height = size.height,
            "Source raster probed"
        );

        if self.config.clear_tables {
            self.store
                .clear(
                    self.commands.as_ref(),
                    &[
                        self.config.tile_table.as_str(),
                        self.config.contour_table.as_str(),
                    ],
                )
                .await
                .map_err(SchedulerError::ClearTables)?;
        }

        let params = GridParams {
            src_width: size.width,
            src_height: size.height,
            tile_buffer_px: self.config.tile_buffer,
            magnifier: self.config.magnifier,
        };

        let mut zooms = Vec::new();
        let mut interrupted = false;

        for zoom in self.config.min_zoom..=self.config.max_zoom {
            let num_rows = 1u32 << zoom;
            let total = u64::from(num_rows) * u64::from(num_rows);
            self.progress.reset(total);

            let mut dispatched = 0u64;
            'tiles: for col in 0..num_rows {
                for row in 0..num_rows {
                    if self.cancel.is_cancelled() {
                        interrupted = true;
                        break 'tiles;
                    }
                    let coord = TileCoord { zoom, col, row };
                    let window = tile_window(coord, &params)?;
                    self.dispatcher.submit(TileTask { coord, window }).await?;
                    dispatched += 1;
                }
            }

            // Join barrier: the next level (and its table clearing
            // implications) never starts while this one is still writing.
            self.dispatcher.drain().await;
            println!();

            zooms.push(ZoomReport {
                zoom,
                dispatched,
                total,
            });

            if interrupted {
                info!(zoom, dispatched, total, "Interrupted during zoom level");
                break;
            }

            println!("Zoom level {} complete", zoom);
            info!(zoom, dispatched, "Zoom level complete");
        }

        Ok(RunSummary {
            outcome: if interrupted {
                RunOutcome::Interrupted
            } else {
                RunOutcome::Completed
            },
            zooms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{TileOutcome, TileRunner};
    use crate::raster::RasterSize;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FixedProbe {
        size: RasterSize,
    }

    impl RasterProbe for FixedProbe {
        async fn probe(&self, _path: &Path) -> Result<RasterSize, ProbeError> {
            Ok(self.size)
        }
    }

    struct NullCommands;

    impl CommandRunner for NullCommands {
        async fn run(
            &self,
            _cmd: crate::exec::StageCommand,
        ) -> Result<(), crate::exec::CommandError> {
            Ok(())
        }
    }

    struct CountingRunner {
        runs: AtomicUsize,
        coords: StdMutex<Vec<TileCoord>>,
    }

    impl CountingRunner {
        fn new() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                coords: StdMutex::new(Vec::new()),
            }
        }
    }

    impl TileRunner for CountingRunner {
        async fn run(&self, task: TileTask) -> TileOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.coords.lock().unwrap().push(task.coord);
            TileOutcome::Completed {
                label: task.coord.label(),
            }
        }
    }

    fn writable_config(dir: &tempfile::TempDir) -> RunConfig {
        let source = dir.path().join("bathy.tif");
        std::fs::write(&source, b"raster").unwrap();
        RunConfig::new(source, "ocean-tiles")
    }

    #[tokio::test]
    async fn test_single_zoom_processes_every_tile() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(writable_config(&dir).with_zoom_range(2, 2));
        let progress = Arc::new(ProgressCounter::new("processed"));
        let runner = Arc::new(CountingRunner::new());
        let pool = LocalPool::new(Arc::clone(&runner), 4, Arc::clone(&progress));

        let scheduler = Scheduler::new(
            Arc::clone(&config),
            pool,
            FixedProbe {
                size: RasterSize {
                    width: 4096,
                    height: 4096,
                },
            },
            Arc::new(NullCommands),
            Arc::clone(&progress),
            CancellationToken::new(),
        );

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.zooms.len(), 1);
        assert_eq!(summary.zooms[0].dispatched, 16);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 16);
        assert_eq!(progress.processed(), 16);
    }

    #[tokio::test]
    async fn test_zoom_range_ascending_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(writable_config(&dir).with_zoom_range(0, 2));
        let progress = Arc::new(ProgressCounter::new("processed"));
        let runner = Arc::new(CountingRunner::new());
        let pool = LocalPool::new(Arc::clone(&runner), 4, Arc::clone(&progress));

        let scheduler = Scheduler::new(
            config,
            pool,
            FixedProbe {
                size: RasterSize {
                    width: 4096,
                    height: 4096,
                },
            },
            Arc::new(NullCommands),
            progress,
            CancellationToken::new(),
        );

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        let totals: Vec<u64> = summary.zooms.iter().map(|z| z.total).collect();
        assert_eq!(totals, vec![1, 4, 16]);

        // Strictly ascending zoom order in dispatch: every zoom-1 tile runs
        // after the zoom-0 tile and before any zoom-2 tile.
        let coords = runner.coords.lock().unwrap();
        assert_eq!(coords.len(), 21);
        assert_eq!(coords[0].zoom, 0);
        assert!(coords[1..5].iter().all(|c| c.zoom == 1));
        assert!(coords[5..].iter().all(|c| c.zoom == 2));
    }

    #[tokio::test]
    async fn test_config_error_surfaces_before_dispatch() {
        let config = Arc::new(
            RunConfig::new("/no/such/raster.tif", "db").with_zoom_range(2, 2),
        );
        let progress = Arc::new(ProgressCounter::new("processed"));
        let runner = Arc::new(CountingRunner::new());
        let pool = LocalPool::new(Arc::clone(&runner), 4, Arc::clone(&progress));

        let scheduler = Scheduler::new(
            config,
            pool,
            FixedProbe {
                size: RasterSize {
                    width: 4096,
                    height: 4096,
                },
            },
            Arc::new(NullCommands),
            progress,
            CancellationToken::new(),
        );

        let result = scheduler.run().await;

        assert!(matches!(result, Err(SchedulerError::Config(_))));
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_tables_issued_before_dispatch() {
        struct OrderSensitiveCommands {
            drops: AtomicUsize,
        }

        impl CommandRunner for OrderSensitiveCommands {
            async fn run(
                &self,
                cmd: crate::exec::StageCommand,
            ) -> Result<(), crate::exec::CommandError> {
                if cmd.program == "psql" {
                    self.drops.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = writable_config(&dir).with_zoom_range(0, 0);
        config.clear_tables = true;
        let config = Arc::new(config);

        let progress = Arc::new(ProgressCounter::new("processed"));
        let runner = Arc::new(CountingRunner::new());
        let pool = LocalPool::new(Arc::clone(&runner), 2, Arc::clone(&progress));
        let commands = Arc::new(OrderSensitiveCommands {
            drops: AtomicUsize::new(0),
        });

        let scheduler = Scheduler::new(
            config,
            pool,
            FixedProbe {
                size: RasterSize {
                    width: 1024,
                    height: 1024,
                },
            },
            Arc::clone(&commands),
            progress,
            CancellationToken::new(),
        );

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        // Tile table and contour table both dropped.
        assert_eq!(commands.drops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interrupt_stops_new_dispatch() {
        /// Cancels the token once a few tiles have started.
        struct CancellingRunner {
            cancel: CancellationToken,
            runs: AtomicUsize,
        }

        impl TileRunner for CancellingRunner {
            async fn run(&self, task: TileTask) -> TileOutcome {
                let n = self.runs.fetch_add(1, Ordering::SeqCst);
                if n == 2 {
                    self.cancel.cancel();
                }
                TileOutcome::Completed {
                    label: task.coord.label(),
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(writable_config(&dir).with_zoom_range(3, 4));
        let cancel = CancellationToken::new();
        let progress = Arc::new(ProgressCounter::new("processed"));
        let runner = Arc::new(CancellingRunner {
            cancel: cancel.clone(),
            runs: AtomicUsize::new(0),
        });
        // Single worker: dispatch backpressure guarantees the scheduler
        // observes the cancellation before the level drains.
        let pool = LocalPool::new(Arc::clone(&runner), 1, Arc::clone(&progress));

        let scheduler = Scheduler::new(
            config,
            pool,
            FixedProbe {
                size: RasterSize {
                    width: 4096,
                    height: 4096,
                },
            },
            Arc::new(NullCommands),
            progress,
            cancel,
        );

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        // Interrupted inside zoom 3: far fewer than 64 dispatches, and
        // zoom 4 never starts.
        assert_eq!(summary.zooms.len(), 1);
        assert_eq!(summary.zooms[0].zoom, 3);
        assert!(summary.zooms[0].dispatched < summary.zooms[0].total);
        // Everything dispatched reached a terminal state.
        assert_eq!(
            runner.runs.load(Ordering::SeqCst) as u64,
            summary.zooms[0].dispatched
        );
    }
}

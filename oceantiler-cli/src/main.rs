//! Oceantiler CLI.
//!
//! Parses the command line, wires the interrupt signal to the engine's
//! cancellation token and maps the run outcome onto process exit codes:
//! 0 on completion, 1 on configuration or scheduling errors, 130 after an
//! operator interrupt.

mod spool;

use clap::Parser;
use oceantiler::config::{default_worker_count, DispatchStrategy, RunConfig};
use oceantiler::exec::ProcessRunner;
use oceantiler::grid::TileCoord;
use oceantiler::logging::init_logging;
use oceantiler::pipeline::PipelineRunner;
use oceantiler::raster::GdalRasterProbe;
use oceantiler::scheduler::{
    Dispatcher, LocalPool, ProgressCounter, RemoteQueue, RunOutcome, Scheduler, SchedulerError,
};
use spool::SpoolQueue;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const EXIT_ERROR: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "oceantiler")]
#[command(about = "Generate a bathymetry tile pyramid into a spatial database", version)]
struct Args {
    /// Input raster file
    #[arg(value_name = "INPUT")]
    file_path: PathBuf,

    /// Vertical exaggeration for the shading stage
    #[arg(long, default_value_t = 20.0)]
    vert_exag: f64,

    /// Tile buffer in pixels (0 is no buffer)
    #[arg(long, default_value_t = 8)]
    tile_buffer: u32,

    /// Clipping boundary file
    #[arg(long, value_name = "CLIPFILE_PATH")]
    clipfile: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug with command lines)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Wait for input after each tile is generated, before its temporary
    /// workspace is removed. For development/testing purposes.
    #[arg(short, long)]
    pause: bool,

    /// Output database
    #[arg(long = "db-name", value_name = "DB_NAME", default_value = "ocean-tiles")]
    db_name: String,

    /// Contour table name
    #[arg(long, default_value = "contour")]
    contour_table: String,

    /// Bathy table name
    #[arg(long, default_value = "bathy")]
    bathy_table: String,

    /// Clear destination tables before creating tiles
    #[arg(long)]
    clear_tables: bool,

    /// Hand tiles to the external task queue instead of processing locally
    #[arg(long)]
    queue: bool,

    /// Spool file receiving queued task descriptors
    #[arg(long, default_value = "tasks.jsonl")]
    queue_spool: PathBuf,

    /// Copy each tile's output into this directory
    #[arg(long = "copy-output-dir", short = 'o')]
    copy_output_dir: Option<PathBuf>,

    /// Lowest zoom level
    #[arg(long, default_value_t = 0)]
    min_zoom: u8,

    /// Highest zoom level
    #[arg(long, default_value_t = 6)]
    max_zoom: u8,

    /// Ratio between the tile used for data processing and the output tile
    /// (higher means more features in tile)
    #[arg(short = 'q', long, default_value_t = 4)]
    magnifier: u32,

    /// Local worker pool size (default: twice the CPU count)
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let dispatch = if self.queue {
            DispatchStrategy::RemoteQueue
        } else {
            DispatchStrategy::LocalPool {
                workers: self.workers.unwrap_or_else(default_worker_count),
            }
        };

        let mut config = RunConfig::new(self.file_path, self.db_name)
            .with_zoom_range(self.min_zoom, self.max_zoom)
            .with_tile_buffer(self.tile_buffer)
            .with_magnifier(self.magnifier)
            .with_dispatch(dispatch);
        config.vert_exag = self.vert_exag;
        config.tile_table = self.bathy_table;
        config.contour_table = self.contour_table;
        config.clear_tables = self.clear_tables;
        config.verbosity = self.verbosity;
        config.clipfile = self.clipfile;
        config.copy_output_dir = self.copy_output_dir;
        config
    }
}

/// Blocking stdin wait between a tile's completion and the removal of its
/// workspace. A deliberate debugging aid, enabled by `--pause`.
fn pause_hook(coord: &TileCoord, workspace: &Path) {
    println!("\n{} workspace: {}", coord, workspace.display());
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}

async fn run(
    config: Arc<RunConfig>,
    dispatcher: impl Dispatcher,
    commands: Arc<ProcessRunner>,
    progress: Arc<ProgressCounter>,
    cancel: CancellationToken,
) -> Result<RunOutcome, SchedulerError> {
    let scheduler = Scheduler::new(
        config,
        dispatcher,
        GdalRasterProbe::new(),
        commands,
        progress,
        cancel,
    );
    scheduler.run().await.map(|summary| summary.outcome)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let pause = args.pause;
    let queue_spool = args.queue_spool.clone();
    let use_queue = args.queue;

    let _logging_guard = match init_logging("logs", "oceantiler.log", args.verbosity) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {}", e);
            process::exit(EXIT_ERROR);
        }
    };

    let config = args.into_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        process::exit(EXIT_ERROR);
    }
    let config = Arc::new(config);

    // Operator interrupt: stop dispatching new tiles, let in-flight tiles
    // finish their current stage, exit with a distinct status.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nReceived exit signal, shutting down...");
                cancel.cancel();
            }
        });
    }

    let commands = Arc::new(ProcessRunner::new(config.verbosity));
    info!(version = oceantiler::VERSION, "Starting oceantiler");

    let result = if use_queue {
        let progress = Arc::new(ProgressCounter::new("scheduled"));
        let spool = match SpoolQueue::open(&queue_spool) {
            Ok(spool) => spool,
            Err(e) => {
                eprintln!("Error opening queue spool {}: {}", queue_spool.display(), e);
                process::exit(EXIT_ERROR);
            }
        };
        info!(spool = %spool.path().display(), "Queueing tile tasks for external workers");
        let dispatcher = RemoteQueue::new(
            Arc::new(spool),
            Arc::clone(&config),
            Arc::clone(&progress),
        );
        run(config, dispatcher, commands, progress, cancel).await
    } else {
        let progress = Arc::new(ProgressCounter::new("processed"));
        let workers = match config.dispatch {
            DispatchStrategy::LocalPool { workers } => workers,
            DispatchStrategy::RemoteQueue => default_worker_count(),
        };
        let mut runner = PipelineRunner::new(
            Arc::clone(&config),
            Arc::clone(&commands),
            cancel.clone(),
        );
        if pause {
            runner = runner.with_post_run_hook(Arc::new(pause_hook));
        }
        let dispatcher = LocalPool::new(Arc::new(runner), workers, Arc::clone(&progress));
        run(config, dispatcher, commands, progress, cancel).await
    };

    match result {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Interrupted) => process::exit(EXIT_INTERRUPTED),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_ERROR);
        }
    }
}

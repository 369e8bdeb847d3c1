//! Tile dispatch strategies.
//!
//! The scheduler is written once against the [`Dispatcher`] capability;
//! the two variants are:
//!
//! - [`LocalPool`] - a bounded in-process pool. `submit` applies
//!   backpressure (it waits for a free worker slot), `drain` is the join
//!   barrier the scheduler uses between zoom levels.
//! - [`RemoteQueue`] - serializes a [`TaskDescriptor`] per tile for an
//!   external worker fleet. Only the enqueue acknowledgment is awaited;
//!   `drain` has nothing to wait for.

use crate::config::RunConfig;
use crate::pipeline::{TileOutcome, TileRunner, TileTask};
use crate::scheduler::progress::ProgressCounter;
use crate::scheduler::queue::{QueueError, TaskDescriptor, TaskQueue};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Errors submitting a tile for execution.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("local worker pool is closed")]
    PoolClosed,

    #[error("task queue submission failed: {0}")]
    Queue(#[from] QueueError),
}

/// Capability to execute tiles, abstracting local vs. remote execution.
pub trait Dispatcher: Send + Sync {
    /// Hands one tile over for execution.
    fn submit(&self, task: TileTask) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Waits until every submitted tile has reached a terminal state.
    fn drain(&self) -> impl Future<Output = ()> + Send;
}

/// Bounded in-process worker pool.
///
/// Tiles run concurrently up to the worker limit; the progress counter
/// advances on every terminal outcome, success and failure alike. A failed
/// tile never aborts its siblings.
pub struct LocalPool<R: TileRunner> {
    runner: Arc<R>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    progress: Arc<ProgressCounter>,
}

impl<R: TileRunner> LocalPool<R> {
    pub fn new(runner: Arc<R>, workers: usize, progress: Arc<ProgressCounter>) -> Self {
        Self {
            runner,
            permits: Arc::new(Semaphore::new(workers)),
            tasks: Mutex::new(JoinSet::new()),
            progress,
        }
    }
}

impl<R: TileRunner> Dispatcher for LocalPool<R> {
    async fn submit(&self, task: TileTask) -> Result<(), DispatchError> {
        // Backpressure: wait for a worker slot before accepting the tile,
        // so the scheduler's enumeration loop observes cancellation
        // promptly instead of flooding the queue.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::PoolClosed)?;

        let runner = Arc::clone(&self.runner);
        let progress = Arc::clone(&self.progress);
        self.tasks.lock().await.spawn(async move {
            let coord = task.coord;
            let outcome = runner.run(task).await;
            match &outcome {
                TileOutcome::Completed { label } => {
                    debug!(tile = %coord, label = %label, "Tile complete");
                }
                TileOutcome::Failed { stage, error } => {
                    warn!(tile = %coord, stage = %stage, error = %error, "Tile failed");
                }
                TileOutcome::Cancelled => {
                    debug!(tile = %coord, "Tile cancelled");
                }
            }
            progress.record_and_report();
            drop(permit);
        });
        Ok(())
    }

    async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

/// Fire-and-forget handoff to an external task queue.
pub struct RemoteQueue<Q: TaskQueue> {
    queue: Arc<Q>,
    config: Arc<RunConfig>,
    progress: Arc<ProgressCounter>,
}

impl<Q: TaskQueue> RemoteQueue<Q> {
    pub fn new(queue: Arc<Q>, config: Arc<RunConfig>, progress: Arc<ProgressCounter>) -> Self {
        Self {
            queue,
            config,
            progress,
        }
    }
}

impl<Q: TaskQueue> Dispatcher for RemoteQueue<Q> {
    async fn submit(&self, task: TileTask) -> Result<(), DispatchError> {
        let descriptor = TaskDescriptor::from_task(&self.config, &task);
        self.queue.submit(descriptor).await?;
        self.progress.record_and_report();
        Ok(())
    }

    async fn drain(&self) {
        // Enqueue-only: completion happens out of process.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{tile_window, GridParams, TileCoord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn task(col: u32, row: u32) -> TileTask {
        let params = GridParams {
            src_width: 4096,
            src_height: 4096,
            tile_buffer_px: 8,
            magnifier: 4,
        };
        let coord = TileCoord { zoom: 2, col, row };
        TileTask {
            coord,
            window: tile_window(coord, &params).unwrap(),
        }
    }

    /// Tracks peak concurrency and fails tiles on request.
    struct TrackingRunner {
        current: AtomicUsize,
        peak: AtomicUsize,
        runs: AtomicUsize,
        fail_every_other: bool,
    }

    impl TrackingRunner {
        fn new(fail_every_other: bool) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                fail_every_other,
            }
        }
    }

    impl TileRunner for TrackingRunner {
        async fn run(&self, task: TileTask) -> TileOutcome {
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && n % 2 == 1 {
                TileOutcome::Failed {
                    stage: crate::pipeline::StageKind::Shade,
                    error: crate::exec::CommandError::ExitStatus {
                        program: "gdaldem",
                        code: 1,
                    }
                    .into(),
                }
            } else {
                TileOutcome::Completed {
                    label: task.coord.label(),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_local_pool_processes_all_tiles() {
        let runner = Arc::new(TrackingRunner::new(false));
        let progress = Arc::new(ProgressCounter::new("processed"));
        progress.reset(16);
        let pool = LocalPool::new(Arc::clone(&runner), 4, Arc::clone(&progress));

        for col in 0..4 {
            for row in 0..4 {
                pool.submit(task(col, row)).await.unwrap();
            }
        }
        pool.drain().await;

        assert_eq!(runner.runs.load(Ordering::SeqCst), 16);
        assert!(progress.is_complete());
    }

    #[tokio::test]
    async fn test_local_pool_bounds_concurrency() {
        let runner = Arc::new(TrackingRunner::new(false));
        let progress = Arc::new(ProgressCounter::new("processed"));
        progress.reset(16);
        let pool = LocalPool::new(Arc::clone(&runner), 3, Arc::clone(&progress));

        for col in 0..4 {
            for row in 0..4 {
                pool.submit(task(col, row)).await.unwrap();
            }
        }
        pool.drain().await;

        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failed_tiles_still_advance_progress() {
        let runner = Arc::new(TrackingRunner::new(true));
        let progress = Arc::new(ProgressCounter::new("processed"));
        progress.reset(16);
        let pool = LocalPool::new(Arc::clone(&runner), 4, Arc::clone(&progress));

        for col in 0..4 {
            for row in 0..4 {
                pool.submit(task(col, row)).await.unwrap();
            }
        }
        pool.drain().await;

        // Half the tiles failed; the counter still drained to the total.
        assert_eq!(progress.processed(), 16);
        assert!(progress.is_complete());
    }

    /// Records submitted descriptors; optionally rejects everything.
    struct RecordingQueue {
        submitted: StdMutex<Vec<TaskDescriptor>>,
        reject: bool,
    }

    impl TaskQueue for RecordingQueue {
        async fn submit(&self, descriptor: TaskDescriptor) -> Result<(), QueueError> {
            if self.reject {
                return Err(QueueError::new("broker unavailable"));
            }
            self.submitted.lock().unwrap().push(descriptor);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_remote_queue_submits_descriptors() {
        let queue = Arc::new(RecordingQueue {
            submitted: StdMutex::new(Vec::new()),
            reject: false,
        });
        let config = Arc::new(RunConfig::new("/data/bathy.tif", "ocean-tiles"));
        let progress = Arc::new(ProgressCounter::new("scheduled"));
        progress.reset(2);
        let dispatcher = RemoteQueue::new(Arc::clone(&queue), config, Arc::clone(&progress));

        dispatcher.submit(task(0, 0)).await.unwrap();
        dispatcher.submit(task(0, 1)).await.unwrap();
        dispatcher.drain().await;

        let submitted = queue.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].db_name, "ocean-tiles");
        assert_eq!(progress.processed(), 2);
    }

    #[tokio::test]
    async fn test_remote_queue_surfaces_rejection() {
        let queue = Arc::new(RecordingQueue {
            submitted: StdMutex::new(Vec::new()),
            reject: true,
        });
        let config = Arc::new(RunConfig::new("/data/bathy.tif", "ocean-tiles"));
        let progress = Arc::new(ProgressCounter::new("scheduled"));
        progress.reset(1);
        let dispatcher = RemoteQueue::new(queue, config, Arc::clone(&progress));

        let result = dispatcher.submit(task(0, 0)).await;

        assert!(matches!(result, Err(DispatchError::Queue(_))));
        assert_eq!(progress.processed(), 0);
    }
}

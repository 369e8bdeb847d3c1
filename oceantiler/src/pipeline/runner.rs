//! Tile pipeline runner.
//!
//! [`PipelineRunner`] executes the full stage chain for one tile inside a
//! scoped temporary workspace. The workspace is owned exclusively by the run
//! and removed on every exit path - success, stage failure or cancellation -
//! via `TempDir`'s Drop, not best-effort cleanup.

use crate::config::RunConfig;
use crate::exec::{CommandError, CommandRunner};
use crate::grid::{TileCoord, TileWindow};
use crate::pipeline::chain::{build_chain, Stage};
use crate::pipeline::error::{StageKind, TileOutcome};
use crate::store::SpatialStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff before the single persist retry.
///
/// The first append into a not-yet-existing table races sibling runs that
/// may be creating the same table; a short wait lets the winner finish
/// creation before the second attempt.
pub const PERSIST_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// The unit of dispatch: a tile plus its precomputed source window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileTask {
    pub coord: TileCoord,
    pub window: TileWindow,
}

/// Callback invoked after a successful run, before the workspace is
/// released. A debugging aid (the CLI wires an operator pause to it);
/// the default is no hook.
pub type PostRunHook = dyn Fn(&TileCoord, &Path) + Send + Sync;

/// Capability to run one tile's pipeline to a terminal outcome.
pub trait TileRunner: Send + Sync + 'static {
    fn run(&self, task: TileTask) -> impl Future<Output = TileOutcome> + Send;
}

/// Runs the stage chain for a tile through a [`CommandRunner`].
pub struct PipelineRunner<R: CommandRunner> {
    config: Arc<RunConfig>,
    store: SpatialStore,
    commands: Arc<R>,
    cancel: CancellationToken,
    post_run: Option<Arc<PostRunHook>>,
}

impl<R: CommandRunner> PipelineRunner<R> {
    pub fn new(config: Arc<RunConfig>, commands: Arc<R>, cancel: CancellationToken) -> Self {
        let store = SpatialStore::new(&config.db_name);
        Self {
            config,
            store,
            commands,
            cancel,
            post_run: None,
        }
    }

    /// Installs a post-run hook (builder pattern).
    pub fn with_post_run_hook(mut self, hook: Arc<PostRunHook>) -> Self {
        self.post_run = Some(hook);
        self
    }

    /// Runs a persist stage with the one-shot backoff retry. All other
    /// stage failures are immediately terminal for the tile.
    async fn run_persist(&self, stage: &Stage) -> Result<(), CommandError> {
        match self.commands.run(stage.command.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(
                    stage = %stage.kind,
                    error = %first,
                    "Persist failed, retrying once after backoff"
                );
                tokio::time::sleep(PERSIST_RETRY_BACKOFF).await;
                self.commands.run(stage.command.clone()).await
            }
        }
    }
}

impl<R: CommandRunner> TileRunner for PipelineRunner<R> {
    async fn run(&self, task: TileTask) -> TileOutcome {
        if self.cancel.is_cancelled() {
            return TileOutcome::Cancelled;
        }

        let workspace = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => {
                return TileOutcome::Failed {
                    stage: StageKind::Workspace,
                    error: error.into(),
                }
            }
        };

        let chain = build_chain(
            &self.config,
            &self.store,
            task.coord,
            &task.window,
            workspace.path(),
        );

        for stage in &chain {
            // Cancellation stops the chain between stages; an in-flight
            // external call is always allowed to finish so the destination
            // store never sees a half-written tile stage.
            if self.cancel.is_cancelled() {
                debug!(tile = %task.coord, stage = %stage.kind, "Cancelled before stage");
                return TileOutcome::Cancelled;
            }

            let result = if stage.kind.is_persist() {
                self.run_persist(stage).await
            } else {
                self.commands.run(stage.command.clone()).await
            };

            if let Err(error) = result {
                return TileOutcome::Failed {
                    stage: stage.kind,
                    error: error.into(),
                };
            }
        }

        if let Some(hook) = &self.post_run {
            hook(&task.coord, workspace.path());
        }

        TileOutcome::Completed {
            label: task.coord.label(),
        }
    }
}

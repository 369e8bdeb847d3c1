//! Stage vocabulary and per-tile outcomes.

use crate::exec::CommandError;
use thiserror::Error;

/// The named steps of the per-tile pipeline, in execution order.
///
/// `Workspace` is not a processing stage; it names failures acquiring the
/// tile's scoped temporary directory so every failure carries a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Workspace,
    Subset,
    Resample,
    Contour,
    ContourPersist,
    ClipExtract,
    Clip,
    Shade,
    Threshold,
    Combine,
    CombineConvert,
    Georeference,
    Polygonize,
    TagZoom,
    CopyOutput,
    Persist,
}

impl StageKind {
    /// Stages that append into the destination store and may race sibling
    /// runs on first-write table creation. Only these are retried.
    #[inline]
    pub fn is_persist(&self) -> bool {
        matches!(self, StageKind::ContourPersist | StageKind::Persist)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Workspace => "workspace",
            StageKind::Subset => "subset",
            StageKind::Resample => "resample",
            StageKind::Contour => "contour",
            StageKind::ContourPersist => "contour-persist",
            StageKind::ClipExtract => "clip-extract",
            StageKind::Clip => "clip",
            StageKind::Shade => "shade",
            StageKind::Threshold => "threshold",
            StageKind::Combine => "combine",
            StageKind::CombineConvert => "combine-convert",
            StageKind::Georeference => "georeference",
            StageKind::Polygonize => "polygonize",
            StageKind::TagZoom => "tag-zoom",
            StageKind::CopyOutput => "copy-output",
            StageKind::Persist => "persist",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong inside a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// External utility failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Workspace could not be created.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Terminal result of one tile's pipeline run.
///
/// A failed tile never aborts sibling tiles; rows it already appended stay
/// in the destination table (append is not transactional).
#[derive(Debug)]
pub enum TileOutcome {
    /// All stages ran; `label` identifies the tile in operator output.
    Completed { label: String },

    /// A stage failed; the remaining stages were skipped.
    Failed { stage: StageKind, error: StageError },

    /// Cancellation was observed before a stage start.
    Cancelled,
}

impl TileOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, TileOutcome::Completed { .. })
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, TileOutcome::Failed { .. })
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TileOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_stages() {
        assert!(StageKind::Persist.is_persist());
        assert!(StageKind::ContourPersist.is_persist());
        assert!(!StageKind::Subset.is_persist());
        assert!(!StageKind::Shade.is_persist());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(StageKind::Subset.to_string(), "subset");
        assert_eq!(StageKind::TagZoom.to_string(), "tag-zoom");
        assert_eq!(StageKind::ContourPersist.to_string(), "contour-persist");
    }

    #[test]
    fn test_outcome_predicates() {
        let done = TileOutcome::Completed {
            label: "0 - 0".to_string(),
        };
        assert!(done.is_completed());
        assert!(!done.is_failed());
        assert!(TileOutcome::Cancelled.is_cancelled());
    }
}

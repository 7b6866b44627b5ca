//! Progress reporting for stitching runs.

use std::sync::Arc;

use crate::tile::TileId;

/// Progress information for a stitching run.
#[derive(Debug, Clone)]
pub struct StitchProgress {
    /// Steps finished so far within the stage.
    pub current: usize,
    /// Total number of steps in the stage.
    pub total: usize,
    pub stage: StitchStage,
    /// Tile that was just placed, if the step concerns a single tile.
    pub tile: Option<TileId>,
}

/// Stage of a stitching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStage {
    /// Greedy placement of grid tiles.
    Placement,
    /// Pairwise matching of overlapping tiles.
    Matching,
    /// Global optimization pass.
    Optimization,
    /// Run finished.
    Done,
}

/// Callback type for progress reporting.
pub type ProgressCallback = Option<Arc<dyn Fn(StitchProgress) + Send + Sync>>;

/// Report progress using the callback if set.
pub fn report_progress(
    callback: &ProgressCallback,
    current: usize,
    total: usize,
    stage: StitchStage,
    tile: Option<TileId>,
) {
    if let Some(f) = callback.as_ref() {
        f(StitchProgress {
            current,
            total,
            stage,
            tile,
        });
    }
}

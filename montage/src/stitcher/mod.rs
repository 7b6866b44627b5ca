//! Grid stitching controller.
//!
//! [`GridStitcher`] places a set of tiles either greedily in raster order
//! with pairwise correlation ([`PairingRule::Grid`]), or by feature matching
//! every overlapping pair and relaxing the resulting graph
//! ([`PairingRule::Free`]). [`GridStitcher::montage`] registers every
//! overlapping pair with phase correlation instead.
//!
//! # Example
//!
//! ```ignore
//! use montage::{GridStitcher, InMemorySource, StitchingConfig};
//!
//! let stitcher = GridStitcher::new(StitchingConfig::default(), source);
//! let report = stitcher.stitch(&mut tiles, 3)?;
//! for pair in &report.degraded_pairs {
//!     println!("{} -> {} fell back to the default overlap", pair.base, pair.moving);
//! }
//! ```

#[cfg(test)]
mod tests;

mod escalation;
mod free;
mod grid;
mod montage;
mod overlap;

use std::sync::Arc;

use glam::{DAffine2, DVec2};

use crate::cancel::CancelToken;
use crate::config::{PairingRule, StitchingConfig};
use crate::error::{ConfigurationError, Result};
use crate::graph::{OptimizerReport, TileGraph};
use crate::progress::{report_progress, ProgressCallback, StitchProgress, StitchStage};
use crate::source::PixelSource;
use crate::stripe::Direction;
use crate::tile::{Tile, TileId};

pub use escalation::{correlate_pair, default_offset, EstimateMethod, PairEstimate};
pub use overlap::{overlapping_pairs, TilePair};

/// A pair that could not be registered and used the default displacement
/// (grid rule) or was left out of the graph (free rule, montage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradedPair {
    pub base: TileId,
    pub moving: TileId,
    pub direction: Direction,
}

/// Summary of a stitching run.
#[derive(Debug, Clone, Default)]
pub struct StitchReport {
    /// Tiles whose transform was written by the run.
    pub placed: usize,
    pub degraded_pairs: Vec<DegradedPair>,
    /// Tiles disconnected from every fixed tile during optimization.
    pub unanchored: Vec<TileId>,
    /// Edges dropped as inconsistent during optimization.
    pub removed_edges: Vec<(TileId, TileId)>,
    /// Present when a global optimization pass ran.
    pub optimizer: Option<OptimizerReport>,
}

/// Places tiles by pairwise registration.
pub struct GridStitcher {
    config: StitchingConfig,
    source: Arc<dyn PixelSource>,
    cancel: CancelToken,
    progress: ProgressCallback,
}

impl GridStitcher {
    pub fn new(config: StitchingConfig, source: impl PixelSource + 'static) -> Self {
        Self::with_shared_source(config, Arc::new(source))
    }

    pub fn with_shared_source(config: StitchingConfig, source: Arc<dyn PixelSource>) -> Self {
        Self {
            config,
            source,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Use `cancel` to abort long runs from another thread.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Invoke `callback` after each placement step (best effort).
    pub fn with_progress(
        mut self,
        callback: impl Fn(StitchProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &StitchingConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Place `tiles`, laid out row-major with `grid_width` tiles per row.
    ///
    /// Fails before any work on invalid input. On cancellation, tiles
    /// placed so far keep their new transforms.
    pub fn stitch(&self, tiles: &mut [Tile], grid_width: usize) -> Result<StitchReport> {
        validate_tiles(tiles)?;
        if grid_width == 0 {
            return Err(ConfigurationError::InvalidGridWidth(grid_width).into());
        }
        self.config.validate()?;

        tracing::info!(
            tiles = tiles.len(),
            grid_width,
            rule = ?self.config.rule,
            percent_overlap = self.config.percent_overlap,
            scale = self.config.scale,
            "Stitching started"
        );

        let report = match self.config.rule {
            PairingRule::Grid => grid::place(self, tiles, grid_width)?,
            PairingRule::Free => free::place(self, tiles)?,
        };
        self.log_finished(&report);
        Ok(report)
    }

    /// Register every overlapping pair by phase correlation and place the
    /// tiles with the global optimizer, dropping inconsistent links.
    pub fn montage(&self, tiles: &mut [Tile]) -> Result<StitchReport> {
        validate_tiles(tiles)?;
        self.config.validate()?;
        tracing::info!(tiles = tiles.len(), "Overlap montage started");

        let report = montage::place(self, tiles)?;
        self.log_finished(&report);
        Ok(report)
    }

    fn log_finished(&self, report: &StitchReport) {
        if !report.unanchored.is_empty() {
            tracing::warn!(
                tiles = ?report.unanchored,
                "Tiles are not connected to any fixed tile and keep their previous placement"
            );
        }
        tracing::info!(
            placed = report.placed,
            degraded = report.degraded_pairs.len(),
            removed_edges = report.removed_edges.len(),
            "Stitching finished"
        );
    }

    fn progress(&self, current: usize, total: usize, stage: StitchStage, tile: Option<TileId>) {
        report_progress(&self.progress, current, total, stage, tile);
    }
}

fn validate_tiles(tiles: &[Tile]) -> std::result::Result<(), ConfigurationError> {
    if tiles.len() < 2 {
        return Err(ConfigurationError::TooFewTiles(tiles.len()));
    }
    let (expected_width, expected_height) = (tiles[0].width(), tiles[0].height());
    for (index, tile) in tiles.iter().enumerate().skip(1) {
        if tile.width() != expected_width || tile.height() != expected_height {
            return Err(ConfigurationError::DimensionMismatch {
                index,
                width: tile.width(),
                height: tile.height(),
                expected_width,
                expected_height,
            });
        }
    }
    Ok(())
}

/// Ids of locked tiles, or the first tile when none is locked.
fn fixed_tiles(tiles: &[Tile]) -> Vec<TileId> {
    let locked: Vec<TileId> = tiles
        .iter()
        .filter(|t| t.is_locked())
        .map(Tile::id)
        .collect();
    if locked.is_empty() {
        vec![tiles[0].id()]
    } else {
        locked
    }
}

/// Graph with one node per tile, modelled as a shift to its current location.
fn graph_for(tiles: &[Tile]) -> (TileGraph, Vec<DVec2>) {
    let mut graph = TileGraph::new();
    let origins: Vec<DVec2> = tiles.iter().map(Tile::location).collect();
    for (tile, &origin) in tiles.iter().zip(&origins) {
        graph.add_node(tile.id(), DAffine2::from_translation(origin));
    }
    (graph, origins)
}

/// Write optimized models back to every anchored tile.
fn apply_models(
    tiles: &mut [Tile],
    graph: &TileGraph,
    origins: &[DVec2],
    optimizer: &OptimizerReport,
) -> usize {
    let mut placed = 0;
    for (tile, &origin) in tiles.iter_mut().zip(origins) {
        if optimizer.unanchored.contains(&tile.id()) {
            continue;
        }
        if let Some(model) = graph.model(tile.id()) {
            tile.apply_model(&model, origin);
            placed += 1;
        }
    }
    placed
}

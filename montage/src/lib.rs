//! Montage - tile registration and mosaic assembly.
//!
//! This library places overlapping image tiles (for example an electron
//! microscopy grid) into one consistent mosaic:
//! - Overlap stripes sampled through each tile's current transform
//! - Phase correlation with overlap widening, cross correlation as fallback
//! - Scale-invariant feature matching with a robust affine fit
//! - Global least-squares relaxation over a graph of tile correspondences
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use montage::{GridStitcher, InMemorySource, StitchingConfig, Tile, TileId};
//!
//! let mut source = InMemorySource::new();
//! let mut tiles = Vec::new();
//! for (i, pixels) in images.into_iter().enumerate() {
//!     tiles.push(Tile::new(TileId(i), pixels.width(), pixels.height()));
//!     source.insert(TileId(i), pixels);
//! }
//!
//! let report = GridStitcher::new(StitchingConfig::default(), source).stitch(&mut tiles, 4)?;
//! println!("{} pairs used the default overlap", report.degraded_pairs.len());
//! ```

mod cancel;
pub mod config;
mod correlation;
pub mod cross_correlation;
mod error;
pub mod features;
pub(crate) mod filter;
pub mod graph;
pub mod mesh;
pub mod model;
pub mod phase_correlation;
mod progress;
mod source;
pub mod stitcher;
pub mod stripe;
mod tile;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Tiles and pixels
// ============================================================================

pub use mesh::{CoordinateTransform, MeshTransform};
pub use source::{InMemorySource, PixelSource, SourceImage};
pub use tile::{Rect, Tile, TileId};

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    CrossCorrelationConfig, FeatureConfig, OptimizerConfig, PairingRule,
    PhaseCorrelationConfig, StitchingConfig, DEFAULT_MIN_R,
};
pub use error::{ConfigurationError, Error, Result};

// ============================================================================
// Pairwise registration
// ============================================================================

pub use correlation::CorrelationResult;
pub use cross_correlation::CrossCorrelationMatcher;
pub use features::{AffineModel, FeatureDescriptor, FeatureMatcher};
pub use model::{ModelKind, PointMatch};
pub use phase_correlation::PhaseCorrelationMatcher;
pub use stripe::{Direction, Roi, Stripe};

// ============================================================================
// Global placement
// ============================================================================

pub use graph::{OptimizerReport, TileGraph};
pub use stitcher::{
    DegradedPair, EstimateMethod, GridStitcher, PairEstimate, StitchReport, TilePair,
};

// ============================================================================
// Run control
// ============================================================================

pub use cancel::CancelToken;
pub use progress::{ProgressCallback, StitchProgress, StitchStage};

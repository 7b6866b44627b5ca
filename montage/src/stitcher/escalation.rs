//! Per-pair displacement estimation with method escalation.
//!
//! Phase correlation runs first at the configured overlap and is retried with
//! wider stripes; cross correlation at a reduced scale follows; the default
//! displacement is the last resort.

use glam::DVec2;

use crate::cancel::CancelToken;
use crate::config::StitchingConfig;
use crate::correlation::CorrelationResult;
use crate::cross_correlation::CrossCorrelationMatcher;
use crate::error::Result;
use crate::phase_correlation::PhaseCorrelationMatcher;
use crate::source::PixelSource;
use crate::stripe::{bounding_extent, sample, stripe_rois, Direction, Stripe};
use crate::tile::Tile;

/// Overlap may exceed 1.0 by this much and still count as full overlap.
const OVERLAP_EPSILON: f64 = 1e-9;

/// How a pair displacement was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateMethod {
    PhaseCorrelation,
    CrossCorrelation,
    /// Every matcher failed; the configured default overlap was used.
    DefaultOverlap,
}

/// Displacement of a moving tile relative to its base tile.
#[derive(Debug, Clone, PartialEq)]
pub struct PairEstimate {
    /// Moving bounding-box origin in the base tile's bounding-box frame.
    pub offset: DVec2,
    pub score: f64,
    pub method: EstimateMethod,
    /// Phase-correlation overlaps tried, in order.
    pub attempted_overlaps: Vec<f64>,
}

impl PairEstimate {
    pub fn is_success(&self) -> bool {
        self.method != EstimateMethod::DefaultOverlap
    }
}

/// Default displacement for a pair of `width x height` tiles.
pub fn default_offset(
    direction: Direction,
    width: f64,
    height: f64,
    config: &StitchingConfig,
) -> DVec2 {
    match direction {
        Direction::TopBottom => DVec2::new(0.0, height - config.default_overlap_y),
        Direction::LeftRight => DVec2::new(width - config.default_overlap_x, 0.0),
    }
}

/// Estimate where `moving` sits relative to `base`.
///
/// Low confidence never fails the call; it ends in `fallback` with
/// [`EstimateMethod::DefaultOverlap`].
pub fn correlate_pair(
    source: &dyn PixelSource,
    config: &StitchingConfig,
    base: &Tile,
    moving: &Tile,
    direction: Direction,
    fallback: DVec2,
    cancel: &CancelToken,
) -> Result<PairEstimate> {
    let phase = PhaseCorrelationMatcher::from_config(&config.phase_correlation);
    let blur = config.phase_correlation.stripe_blur_sigma;
    let mut attempted_overlaps = Vec::new();

    let step = config.phase_correlation.overlap_step;
    let widenings = ((1.0 + OVERLAP_EPSILON - config.percent_overlap) / step).floor() as usize;
    for k in 0..=widenings {
        let overlap = (config.percent_overlap + k as f64 * step).min(1.0);
        cancel.check()?;
        attempted_overlaps.push(overlap);

        let Some((a, b, moving_origin)) =
            pair_stripes(source, base, moving, direction, overlap, config.scale, blur)
        else {
            tracing::debug!(base = %base.id(), moving = %moving.id(), overlap, "No stripes for pair");
            continue;
        };

        match phase.correlate(&a.pixels, &b.pixels, cancel)? {
            CorrelationResult::Success { dx, dy, score } => {
                let offset = a.to_tile(DVec2::new(dx, dy)) - moving_origin;
                tracing::debug!(
                    base = %base.id(),
                    moving = %moving.id(),
                    overlap,
                    score,
                    "Phase correlation matched"
                );
                return Ok(PairEstimate {
                    offset,
                    score,
                    method: EstimateMethod::PhaseCorrelation,
                    attempted_overlaps,
                });
            }
            other => {
                tracing::debug!(
                    base = %base.id(),
                    moving = %moving.id(),
                    overlap,
                    score = other.score(),
                    "Phase correlation not confident, widening overlap"
                );
            }
        }
    }

    if config.cross_correlation.enabled {
        let overlap = (config.percent_overlap * 2.0).min(1.0);
        let scale = config.scale / config.cross_correlation.scale_divisor;
        let (x_fraction, y_fraction) = match direction {
            Direction::TopBottom => (0.9, 0.3),
            Direction::LeftRight => (0.3, 0.9),
        };

        if let Some((a, b, moving_origin)) =
            pair_stripes(source, base, moving, direction, overlap, scale, blur)
        {
            let matcher = CrossCorrelationMatcher::new(config.phase_correlation.min_r);
            let result = matcher.correlate(&a.pixels, &b.pixels, x_fraction, y_fraction, cancel)?;
            if let CorrelationResult::Success { dx, dy, score } = result {
                let offset = a.to_tile(DVec2::new(dx, dy)) - moving_origin;
                tracing::debug!(
                    base = %base.id(),
                    moving = %moving.id(),
                    score,
                    "Cross correlation matched"
                );
                return Ok(PairEstimate {
                    offset,
                    score,
                    method: EstimateMethod::CrossCorrelation,
                    attempted_overlaps,
                });
            }
            tracing::debug!(
                base = %base.id(),
                moving = %moving.id(),
                score = result.score(),
                "Cross correlation not confident"
            );
        }
    }

    Ok(PairEstimate {
        offset: fallback,
        score: 0.0,
        method: EstimateMethod::DefaultOverlap,
        attempted_overlaps,
    })
}

/// Base and moving stripes plus the moving ROI origin in its bounding-box frame.
pub(super) fn pair_stripes(
    source: &dyn PixelSource,
    base: &Tile,
    moving: &Tile,
    direction: Direction,
    overlap: f64,
    scale: f64,
    blur: f64,
) -> Option<(Stripe, Stripe, DVec2)> {
    let (bw, bh) = bounding_extent(base);
    let (mw, mh) = bounding_extent(moving);
    let (base_roi, _) = stripe_rois(direction, bw, bh, overlap);
    let (_, moving_roi) = stripe_rois(direction, mw, mh, overlap);

    let a = sample(source, base, base_roi, scale, blur)?;
    let b = sample(source, moving, moving_roi, scale, blur)?;
    let moving_origin = b.roi.origin();
    Some((a, b, moving_origin))
}

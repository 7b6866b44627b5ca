//! Overlap montage: phase correlation on every overlapping pair, then
//! global placement with inconsistent links removed.

use std::sync::atomic::{AtomicUsize, Ordering};

use glam::DVec2;
use rayon::prelude::*;

use super::escalation::{correlate_pair, PairEstimate};
use super::overlap::{overlapping_pairs, TilePair};
use super::{apply_models, fixed_tiles, graph_for, DegradedPair, GridStitcher, StitchReport};
use crate::error::Result;
use crate::model::ModelKind;
use crate::progress::StitchStage;
use crate::tile::Tile;

pub(super) fn place(stitcher: &GridStitcher, tiles: &mut [Tile]) -> Result<StitchReport> {
    let config = &stitcher.config;
    let cancel = &stitcher.cancel;
    let pairs = overlapping_pairs(tiles);
    tracing::info!(pairs = pairs.len(), "Correlating overlapping tiles");

    let done = AtomicUsize::new(0);
    let shared: &[Tile] = tiles;
    let estimates: Vec<(TilePair, PairEstimate)> = pairs
        .par_iter()
        .map(|&pair| {
            let estimate = correlate_pair(
                stitcher.source.as_ref(),
                config,
                &shared[pair.base],
                &shared[pair.moving],
                pair.direction,
                DVec2::ZERO,
                cancel,
            )?;
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            stitcher.progress(current, pairs.len(), StitchStage::Matching, None);
            Ok((pair, estimate))
        })
        .collect::<Result<_>>()?;

    let mut report = StitchReport::default();
    let (mut graph, origins) = graph_for(tiles);
    for (pair, estimate) in &estimates {
        let (base, moving) = (tiles[pair.base].id(), tiles[pair.moving].id());
        if estimate.is_success() {
            graph.add_matches(base, moving, estimate.offset.x, estimate.offset.y, 1.0);
        } else {
            tracing::warn!(%base, %moving, direction = ?pair.direction, "Pair not registered");
            report.degraded_pairs.push(DegradedPair {
                base,
                moving,
                direction: pair.direction,
            });
        }
    }

    cancel.check()?;
    stitcher.progress(0, 1, StitchStage::Optimization, None);
    let fixed = fixed_tiles(tiles);
    let optimizer = graph.optimize_with_outlier_removal(
        &fixed,
        &config.optimizer,
        ModelKind::Translation,
        cancel,
    )?;

    report.placed = apply_models(tiles, &graph, &origins, &optimizer);
    report.unanchored = optimizer.unanchored.clone();
    report.removed_edges = optimizer.removed_edges.clone();
    report.optimizer = Some(optimizer);
    stitcher.progress(1, 1, StitchStage::Optimization, None);
    stitcher.progress(tiles.len(), tiles.len(), StitchStage::Done, None);
    Ok(report)
}

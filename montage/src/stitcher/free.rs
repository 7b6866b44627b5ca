//! Free-form placement: feature matching on every overlapping pair.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use super::escalation::pair_stripes;
use super::overlap::{overlapping_pairs, TilePair};
use super::{apply_models, fixed_tiles, graph_for, DegradedPair, GridStitcher, StitchReport};
use crate::error::Result;
use crate::features::FeatureMatcher;
use crate::model::PointMatch;
use crate::progress::StitchStage;
use crate::tile::Tile;

pub(super) fn place(stitcher: &GridStitcher, tiles: &mut [Tile]) -> Result<StitchReport> {
    let config = &stitcher.config;
    let cancel = &stitcher.cancel;
    let matcher = FeatureMatcher::new(config.features.clone());
    let pairs = overlapping_pairs(tiles);
    tracing::info!(pairs = pairs.len(), "Matching features of overlapping tiles");

    let done = AtomicUsize::new(0);
    let shared: &[Tile] = tiles;
    let results: Vec<(TilePair, Option<Vec<PointMatch>>)> = pairs
        .par_iter()
        .map(|&pair| {
            let matches = match_pair(stitcher, &matcher, shared, pair)?;
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            stitcher.progress(current, pairs.len(), StitchStage::Matching, None);
            Ok((pair, matches))
        })
        .collect::<Result<_>>()?;

    let mut report = StitchReport::default();
    let (mut graph, origins) = graph_for(tiles);
    for (pair, matches) in results {
        let (base, moving) = (tiles[pair.base].id(), tiles[pair.moving].id());
        match matches {
            Some(matches) => graph.add_point_matches(base, moving, &matches),
            None => {
                tracing::warn!(%base, %moving, direction = ?pair.direction, "No feature model for pair");
                report.degraded_pairs.push(DegradedPair {
                    base,
                    moving,
                    direction: pair.direction,
                });
            }
        }
    }

    cancel.check()?;
    stitcher.progress(0, 1, StitchStage::Optimization, None);
    let fixed = fixed_tiles(tiles);
    tracing::info!(
        edges = graph.edge_count(),
        model = ?config.optimizer.free_model,
        "Global optimization"
    );
    let optimizer = graph.minimize(&fixed, &config.optimizer, config.optimizer.free_model, cancel)?;

    report.placed = apply_models(tiles, &graph, &origins, &optimizer);
    report.unanchored = optimizer.unanchored.clone();
    report.optimizer = Some(optimizer);
    stitcher.progress(1, 1, StitchStage::Optimization, None);
    stitcher.progress(tiles.len(), tiles.len(), StitchStage::Done, None);
    Ok(report)
}

/// Feature inliers of one pair in both tiles' bounding-box frames.
fn match_pair(
    stitcher: &GridStitcher,
    matcher: &FeatureMatcher,
    tiles: &[Tile],
    pair: TilePair,
) -> Result<Option<Vec<PointMatch>>> {
    let config = &stitcher.config;
    let stripes = pair_stripes(
        stitcher.source.as_ref(),
        &tiles[pair.base],
        &tiles[pair.moving],
        pair.direction,
        config.percent_overlap,
        config.scale,
        0.0,
    );
    let Some((a, b, _)) = stripes else {
        return Ok(None);
    };

    let Some(model) = matcher.match_stripes(&a, &b, &stitcher.cancel)? else {
        return Ok(None);
    };
    tracing::debug!(
        base = %tiles[pair.base].id(),
        moving = %tiles[pair.moving].id(),
        inliers = model.inliers.len(),
        "Feature model found"
    );

    let matches = model
        .inliers
        .iter()
        .map(|m| PointMatch::new(a.to_tile(m.p1), b.to_tile(m.p2), m.weight))
        .collect();
    Ok(Some(matches))
}

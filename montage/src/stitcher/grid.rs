//! Greedy raster-order placement with an optional global pass.

use glam::DVec2;

use super::escalation::{correlate_pair, default_offset, PairEstimate};
use super::{apply_models, fixed_tiles, graph_for, DegradedPair, GridStitcher, StitchReport};
use crate::error::Result;
use crate::model::ModelKind;
use crate::progress::StitchStage;
use crate::stripe::Direction;
use crate::tile::{Tile, TileId};

/// A pairwise displacement kept for the global pass.
struct Link {
    base: TileId,
    moving: TileId,
    offset: DVec2,
}

/// Which neighbours a tile is compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Neighbours {
    Top,
    Left,
    Both,
}

impl Neighbours {
    fn of(index: usize, grid_width: usize) -> Self {
        if index % grid_width == 0 {
            Neighbours::Top
        } else if index >= grid_width {
            Neighbours::Both
        } else {
            Neighbours::Left
        }
    }
}

pub(super) fn place(
    stitcher: &GridStitcher,
    tiles: &mut [Tile],
    grid_width: usize,
) -> Result<StitchReport> {
    let config = &stitcher.config;
    let source = stitcher.source.as_ref();
    let cancel = &stitcher.cancel;
    let total = tiles.len();

    let mut report = StitchReport {
        placed: 1,
        ..Default::default()
    };
    let mut links: Vec<Link> = Vec::new();
    stitcher.progress(1, total, StitchStage::Placement, Some(tiles[0].id()));

    for i in 1..total {
        cancel.check()?;

        let neighbours = Neighbours::of(i, grid_width);
        let estimate = |base: usize, direction: Direction| -> Result<(usize, PairEstimate)> {
            let base_tile = &tiles[base];
            let bbox = base_tile.bounding_box();
            let fallback = default_offset(direction, bbox.width, bbox.height, config);
            let estimate = correlate_pair(
                source,
                config,
                base_tile,
                &tiles[i],
                direction,
                fallback,
                cancel,
            )?;
            Ok((base, estimate))
        };

        let (left, top) = match neighbours {
            Neighbours::Top => (None, Some(estimate(i - grid_width, Direction::TopBottom)?)),
            Neighbours::Left => (Some(estimate(i - 1, Direction::LeftRight)?), None),
            Neighbours::Both => {
                let (left, top) = rayon::join(
                    || estimate(i - 1, Direction::LeftRight),
                    || estimate(i - grid_width, Direction::TopBottom),
                );
                (Some(left?), Some(top?))
            }
        };

        for (found, direction) in [(&left, Direction::LeftRight), (&top, Direction::TopBottom)] {
            if let Some((base, e)) = found {
                if !e.is_success() {
                    tracing::warn!(
                        base = %tiles[*base].id(),
                        moving = %tiles[i].id(),
                        ?direction,
                        overlaps = ?e.attempted_overlaps,
                        "Pair not registered, using default overlap"
                    );
                    report.degraded_pairs.push(DegradedPair {
                        base: tiles[*base].id(),
                        moving: tiles[i].id(),
                        direction,
                    });
                }
            }
        }

        let location = combine(tiles, left.as_ref(), top.as_ref());

        if config.optimize {
            let any_success = [&left, &top]
                .into_iter()
                .flatten()
                .any(|(_, e)| e.is_success());
            for (base, e) in [&left, &top].into_iter().flatten() {
                if e.is_success() || !any_success {
                    links.push(Link {
                        base: tiles[*base].id(),
                        moving: tiles[i].id(),
                        offset: e.offset,
                    });
                }
            }
        }

        if tiles[i].is_locked() {
            tracing::debug!(tile = %tiles[i].id(), "Locked tile keeps its location");
        } else {
            tiles[i].set_location(location);
            report.placed += 1;
        }
        tracing::info!(
            tile = %tiles[i].id(),
            x = location.x,
            y = location.y,
            "Tile placed"
        );
        stitcher.progress(i + 1, total, StitchStage::Placement, Some(tiles[i].id()));
    }

    if config.optimize {
        cancel.check()?;
        stitcher.progress(0, 1, StitchStage::Optimization, None);

        let (mut graph, origins) = graph_for(tiles);
        for link in &links {
            graph.add_matches(link.base, link.moving, link.offset.x, link.offset.y, 1.0);
        }
        let fixed = fixed_tiles(tiles);
        tracing::info!(
            edges = graph.edge_count(),
            fixed = fixed.len(),
            "Global optimization"
        );

        let optimizer =
            graph.optimize_with_outlier_removal(&fixed, &config.optimizer, ModelKind::Translation, cancel)?;
        apply_models(tiles, &graph, &origins, &optimizer);
        report.unanchored = optimizer.unanchored.clone();
        report.removed_edges = optimizer.removed_edges.clone();
        report.optimizer = Some(optimizer);
        stitcher.progress(1, 1, StitchStage::Optimization, None);
    }

    stitcher.progress(total, total, StitchStage::Done, None);
    Ok(report)
}

/// Absolute location implied by the left and top estimates.
fn combine(
    tiles: &[Tile],
    left: Option<&(usize, PairEstimate)>,
    top: Option<&(usize, PairEstimate)>,
) -> DVec2 {
    let implied = |(base, e): &(usize, PairEstimate)| tiles[*base].location() + e.offset;

    match (left, top) {
        (Some(l), Some(t)) => match (l.1.is_success(), t.1.is_success()) {
            (true, true) => (implied(l) + implied(t)) * 0.5,
            (true, false) => implied(l),
            (false, true) => implied(t),
            // x follows the left default, y the top default.
            (false, false) => DVec2::new(implied(l).x, implied(t).y),
        },
        (Some(only), None) | (None, Some(only)) => implied(only),
        (None, None) => tiles[0].location(),
    }
}

use std::sync::Arc;

use common::Buffer2;
use glam::DVec2;
use parking_lot::Mutex;

use super::*;
use crate::config::PairingRule;
use crate::error::Error;
use crate::model::ModelKind;
use crate::progress::StitchStage;
use crate::source::InMemorySource;
use crate::testing::{grid_from_image, init_tracing, max_position_error, texture};

fn approx_eq(a: DVec2, b: DVec2, eps: f64) -> bool {
    (a - b).length() < eps
}

/// Grid of flat tiles: nothing can be registered.
fn flat_grid(cols: usize, rows: usize, size: usize) -> (Vec<Tile>, InMemorySource) {
    let mut source = InMemorySource::new();
    let mut tiles = Vec::new();
    for i in 0..cols * rows {
        source.insert(TileId(i), Buffer2::new_filled(size, size, 0.5f32));
        tiles.push(Tile::new(TileId(i), size, size));
    }
    (tiles, source)
}

#[test]
fn test_grid_2x2_recovers_positions() {
    init_tracing();
    let global = texture(180, 180, 2.0, 7);
    let mut grid = grid_from_image(&global, 2, 2, 100, 100, 80, 80);

    let stitcher = GridStitcher::new(StitchingConfig::default(), grid.source);
    let report = stitcher.stitch(&mut grid.tiles, grid.grid_width).unwrap();

    assert!(report.degraded_pairs.is_empty(), "{:?}", report.degraded_pairs);
    assert!(report.unanchored.is_empty());
    assert!(report.optimizer.is_some());
    assert_eq!(grid.tiles[0].location(), DVec2::ZERO);
    let error = max_position_error(&grid.tiles, &grid.truth);
    assert!(error < 0.5, "max position error {error}");
}

#[test]
fn test_grid_without_optimization() {
    let global = texture(260, 100, 2.0, 8);
    let mut grid = grid_from_image(&global, 3, 1, 100, 100, 80, 0);

    let config = StitchingConfig {
        optimize: false,
        ..Default::default()
    };
    let report = GridStitcher::new(config, grid.source)
        .stitch(&mut grid.tiles, grid.grid_width)
        .unwrap();

    assert!(report.optimizer.is_none());
    assert_eq!(report.placed, 3);
    assert!(max_position_error(&grid.tiles, &grid.truth) < 0.5);
}

#[test]
fn test_grid_overlap_differs_from_nominal() {
    init_tracing();
    let global = texture(270, 270, 2.0, 21);
    // percent_overlap 0.2 expects 80 px steps; the stripes are shifted against each other.
    for step in [74, 77, 83, 85] {
        for optimize in [true, false] {
            let mut grid = grid_from_image(&global, 3, 3, 100, 100, step, step);
            let config = StitchingConfig {
                optimize,
                ..Default::default()
            };
            let report = GridStitcher::new(config, grid.source)
                .stitch(&mut grid.tiles, grid.grid_width)
                .unwrap();

            assert!(
                report.degraded_pairs.is_empty(),
                "step {step}, optimize {optimize}: {:?}",
                report.degraded_pairs
            );
            let error = max_position_error(&grid.tiles, &grid.truth);
            assert!(error < 0.5, "step {step}, optimize {optimize}: error {error}");
        }
    }
}

#[test]
fn test_pair_offset_with_shifted_overlap() {
    let global = texture(200, 100, 2.0, 22);
    let grid = grid_from_image(&global, 2, 1, 100, 100, 86, 0);
    let config = StitchingConfig::default();

    let estimate = correlate_pair(
        &grid.source,
        &config,
        &grid.tiles[0],
        &grid.tiles[1],
        Direction::LeftRight,
        DVec2::new(80.0, 0.0),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(estimate.method, EstimateMethod::PhaseCorrelation);
    assert_eq!(estimate.attempted_overlaps.len(), 1);
    assert!(approx_eq(estimate.offset, DVec2::new(86.0, 0.0), 1e-9), "{estimate:?}");
}

#[test]
fn test_phase_correlation_succeeds_first_try() {
    let global = texture(180, 100, 2.0, 9);
    let grid = grid_from_image(&global, 2, 1, 100, 100, 80, 0);
    let config = StitchingConfig::default();

    let estimate = correlate_pair(
        &grid.source,
        &config,
        &grid.tiles[0],
        &grid.tiles[1],
        Direction::LeftRight,
        DVec2::new(100.0, 0.0),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(estimate.method, EstimateMethod::PhaseCorrelation);
    assert_eq!(estimate.attempted_overlaps, vec![0.2]);
    assert!(estimate.score > 0.99);
    assert!(approx_eq(estimate.offset, DVec2::new(80.0, 0.0), 1e-9));
}

#[test]
fn test_escalation_widens_overlap_then_falls_back() {
    let (tiles, source) = flat_grid(2, 1, 64);
    let config = StitchingConfig::default();
    let fallback = default_offset(Direction::TopBottom, 64.0, 64.0, &config);
    assert_eq!(fallback, DVec2::new(0.0, 64.0));

    let estimate = correlate_pair(
        &source,
        &config,
        &tiles[0],
        &tiles[1],
        Direction::TopBottom,
        fallback,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(estimate.method, EstimateMethod::DefaultOverlap);
    assert!(!estimate.is_success());
    assert_eq!(estimate.offset, fallback);

    let expected = [0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
    assert_eq!(estimate.attempted_overlaps.len(), expected.len());
    for (got, want) in estimate.attempted_overlaps.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{got} != {want}");
    }
    assert!(estimate.attempted_overlaps.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn test_flat_grid_uses_default_overlap() {
    let (mut tiles, source) = flat_grid(2, 2, 64);
    let config = StitchingConfig {
        default_overlap_x: 16.0,
        default_overlap_y: 16.0,
        ..Default::default()
    };
    let report = GridStitcher::new(config, source)
        .stitch(&mut tiles, 2)
        .unwrap();

    let expected = [
        DVec2::new(0.0, 0.0),
        DVec2::new(48.0, 0.0),
        DVec2::new(0.0, 48.0),
        DVec2::new(48.0, 48.0),
    ];
    for (tile, want) in tiles.iter().zip(expected) {
        assert!(approx_eq(tile.location(), want, 1e-6), "{tile:?}");
    }

    let degraded: Vec<(usize, usize, Direction)> = report
        .degraded_pairs
        .iter()
        .map(|p| (p.base.0, p.moving.0, p.direction))
        .collect();
    assert_eq!(
        degraded,
        vec![
            (0, 1, Direction::LeftRight),
            (0, 2, Direction::TopBottom),
            (2, 3, Direction::LeftRight),
            (1, 3, Direction::TopBottom),
        ]
    );
}

#[test]
fn test_invalid_input_rejected() {
    let (mut tiles, source) = flat_grid(2, 1, 32);
    let stitcher = GridStitcher::new(StitchingConfig::default(), source);

    assert_eq!(
        stitcher.stitch(&mut tiles[..1], 1).unwrap_err(),
        Error::Configuration(ConfigurationError::TooFewTiles(1))
    );
    assert_eq!(
        stitcher.stitch(&mut tiles, 0).unwrap_err(),
        Error::Configuration(ConfigurationError::InvalidGridWidth(0))
    );

    tiles.push(Tile::new(TileId(2), 32, 40));
    assert!(matches!(
        stitcher.stitch(&mut tiles, 3),
        Err(Error::Configuration(ConfigurationError::DimensionMismatch {
            index: 2,
            height: 40,
            expected_height: 32,
            ..
        }))
    ));
}

#[test]
fn test_invalid_config_rejected_before_work() {
    let (mut tiles, source) = flat_grid(2, 1, 32);
    let config = StitchingConfig {
        percent_overlap: 0.0,
        ..Default::default()
    };
    let result = GridStitcher::new(config, source).stitch(&mut tiles, 2);
    assert!(matches!(
        result,
        Err(Error::Configuration(ConfigurationError::InvalidParameter {
            name: "percent_overlap",
            ..
        }))
    ));
    assert!(tiles.iter().all(|t| t.location() == DVec2::ZERO));
}

#[test]
fn test_cancelled_run_leaves_tiles() {
    let global = texture(180, 100, 2.0, 10);
    let mut grid = grid_from_image(&global, 2, 1, 100, 100, 80, 0);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = GridStitcher::new(StitchingConfig::default(), grid.source)
        .with_cancel_token(cancel)
        .stitch(&mut grid.tiles, 2);

    assert_eq!(result.unwrap_err(), Error::Cancelled);
    assert_eq!(grid.tiles[1].location(), DVec2::ZERO);
}

#[test]
fn test_locked_tile_anchors_optimization() {
    let global = texture(180, 180, 2.0, 11);
    let mut grid = grid_from_image(&global, 2, 2, 100, 100, 80, 80);
    let anchor = DVec2::new(1000.0, 500.0);
    grid.tiles[3].set_location(anchor + DVec2::new(80.0, 80.0));
    grid.tiles[3].set_locked(true);

    let report = GridStitcher::new(StitchingConfig::default(), grid.source)
        .stitch(&mut grid.tiles, 2)
        .unwrap();

    assert!(report.unanchored.is_empty());
    assert_eq!(grid.tiles[3].location(), anchor + DVec2::new(80.0, 80.0));
    for (tile, truth) in grid.tiles.iter().zip(&grid.truth) {
        assert!(
            approx_eq(tile.location(), anchor + *truth, 0.5),
            "{} at {:?}",
            tile.id(),
            tile.location()
        );
    }
}

#[test]
fn test_progress_reported_per_tile() {
    let global = texture(260, 100, 2.0, 12);
    let mut grid = grid_from_image(&global, 3, 1, 100, 100, 80, 0);
    let events: Arc<Mutex<Vec<StitchProgress>>> = Arc::default();
    let sink = events.clone();

    GridStitcher::new(StitchingConfig::default(), grid.source)
        .with_progress(move |p| sink.lock().push(p))
        .stitch(&mut grid.tiles, 3)
        .unwrap();

    let events = events.lock();
    let placements: Vec<_> = events
        .iter()
        .filter(|p| p.stage == StitchStage::Placement)
        .map(|p| (p.current, p.tile))
        .collect();
    assert_eq!(
        placements,
        vec![
            (1, Some(TileId(0))),
            (2, Some(TileId(1))),
            (3, Some(TileId(2))),
        ]
    );
    assert!(events.iter().any(|p| p.stage == StitchStage::Optimization));
    assert_eq!(events.last().map(|p| p.stage), Some(StitchStage::Done));
}

#[test]
fn test_overlapping_pairs() {
    let tiles = vec![
        Tile::new(TileId(0), 100, 100),
        Tile::new(TileId(1), 100, 100).with_location(85.0, 3.0),
        Tile::new(TileId(2), 100, 100).with_location(2.0, 82.0),
        Tile::new(TileId(3), 100, 100).with_location(84.0, 81.0),
        Tile::new(TileId(4), 100, 100).with_location(400.0, 0.0),
    ];
    let pairs = overlapping_pairs(&tiles);
    assert_eq!(
        pairs,
        vec![
            TilePair { base: 0, moving: 1, direction: Direction::LeftRight },
            TilePair { base: 0, moving: 2, direction: Direction::TopBottom },
            TilePair { base: 1, moving: 3, direction: Direction::TopBottom },
            TilePair { base: 2, moving: 3, direction: Direction::LeftRight },
        ]
    );

    // Order inside a pair follows position, not index.
    let swapped = vec![
        Tile::new(TileId(0), 100, 100).with_location(0.0, 90.0),
        Tile::new(TileId(1), 100, 100),
    ];
    assert_eq!(
        overlapping_pairs(&swapped),
        vec![TilePair { base: 1, moving: 0, direction: Direction::TopBottom }]
    );
}

#[test]
fn test_montage_refines_rough_layout() {
    init_tracing();
    let global = texture(180, 180, 2.0, 13);
    let mut grid = grid_from_image(&global, 2, 2, 100, 100, 80, 80);
    let jitter = [
        DVec2::ZERO,
        DVec2::new(3.0, -2.0),
        DVec2::new(-4.0, 2.0),
        DVec2::new(2.0, 3.0),
    ];
    for ((tile, truth), j) in grid.tiles.iter_mut().zip(&grid.truth).zip(jitter) {
        tile.set_location(*truth + j);
    }

    let report = GridStitcher::new(StitchingConfig::default(), grid.source)
        .montage(&mut grid.tiles)
        .unwrap();

    assert!(report.degraded_pairs.is_empty());
    assert!(report.removed_edges.is_empty());
    assert_eq!(report.placed, 4);
    for (tile, truth) in grid.tiles.iter().zip(&grid.truth) {
        assert!(approx_eq(tile.location(), *truth, 0.5), "{tile:?}");
    }
}

#[test]
fn test_free_rule_places_by_features() {
    init_tracing();
    let global = texture(256, 160, 2.0, 14);
    let mut grid = grid_from_image(&global, 2, 1, 160, 160, 96, 0);
    grid.tiles[1].set_location(DVec2::new(100.0, 3.0));

    let mut config = StitchingConfig {
        rule: PairingRule::Free,
        percent_overlap: 0.4,
        ..Default::default()
    };
    config.features.seed = Some(1);
    config.optimizer.free_model = ModelKind::Translation;

    let report = GridStitcher::new(config, grid.source)
        .stitch(&mut grid.tiles, 2)
        .unwrap();

    assert!(report.degraded_pairs.is_empty());
    assert_eq!(grid.tiles[0].location(), DVec2::ZERO);
    assert!(
        approx_eq(grid.tiles[1].location(), DVec2::new(96.0, 0.0), 0.5),
        "{:?}",
        grid.tiles[1].location()
    );
}

#[test]
fn test_free_rule_reports_unmatched_pairs() {
    let (mut tiles, source) = flat_grid(2, 1, 64);
    tiles[1].set_location(DVec2::new(40.0, 0.0));
    let config = StitchingConfig {
        rule: PairingRule::Free,
        ..Default::default()
    };

    let report = GridStitcher::new(config, source)
        .stitch(&mut tiles, 2)
        .unwrap();

    assert_eq!(report.degraded_pairs.len(), 1);
    assert_eq!(report.unanchored, vec![TileId(1)]);
    assert_eq!(tiles[1].location(), DVec2::new(40.0, 0.0));
}

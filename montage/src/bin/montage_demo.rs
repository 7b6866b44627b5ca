//! Stitches a synthetic tile grid and prints the recovered tile positions.
//!
//! Usage: `montage-demo [config.yaml]`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::log_setup::setup_logging;
use common::Buffer2;
use glam::DVec2;
use montage::{GridStitcher, InMemorySource, StitchingConfig, Tile, TileId};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const COLS: usize = 3;
const ROWS: usize = 3;
const TILE_SIZE: usize = 128;
const STEP: usize = 102;

fn main() -> Result<()> {
    setup_logging("info", Path::new("logs"))?;

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => StitchingConfig::from_yaml_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StitchingConfig::default(),
    };

    let global = blob_image(
        (COLS - 1) * STEP + TILE_SIZE,
        (ROWS - 1) * STEP + TILE_SIZE,
        400,
        42,
    );

    let mut source = InMemorySource::new();
    let mut tiles = Vec::new();
    let mut truth = Vec::new();
    for r in 0..ROWS {
        for c in 0..COLS {
            let id = TileId(r * COLS + c);
            let (x, y) = (c * STEP, r * STEP);
            source.insert(id, global.crop(x, y, TILE_SIZE, TILE_SIZE));
            tiles.push(Tile::new(id, TILE_SIZE, TILE_SIZE));
            truth.push(DVec2::new(x as f64, y as f64));
        }
    }

    let report = GridStitcher::new(config, source).stitch(&mut tiles, COLS)?;

    println!("{:>6} {:>10} {:>10} {:>8}", "tile", "x", "y", "error");
    for (tile, expected) in tiles.iter().zip(&truth) {
        let location = tile.location();
        println!(
            "{:>6} {:>10.2} {:>10.2} {:>8.3}",
            tile.id().to_string(),
            location.x,
            location.y,
            location.distance(*expected)
        );
    }
    println!(
        "placed {} tiles, {} degraded pairs, {} removed edges",
        report.placed,
        report.degraded_pairs.len(),
        report.removed_edges.len()
    );

    Ok(())
}

/// Random Gaussian blobs on a dim background.
fn blob_image(width: usize, height: usize, count: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut image = Buffer2::new_filled(width, height, 0.1f32);
    for _ in 0..count {
        let cx = rng.random_range(0.0..width as f32);
        let cy = rng.random_range(0.0..height as f32);
        let sigma: f32 = rng.random_range(1.5..5.0);
        let amplitude: f32 = rng.random_range(0.3..1.0);
        let radius = (3.0 * sigma).ceil() as i64;

        for y in (cy as i64 - radius).max(0)..(cy as i64 + radius + 1).min(height as i64) {
            for x in (cx as i64 - radius).max(0)..(cx as i64 + radius + 1).min(width as i64) {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                let value = amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                image[(x as usize, y as usize)] += value;
            }
        }
    }
    image
}

//! Synthetic images and tile layouts for tests.

#![allow(dead_code)]

use common::Buffer2;
use glam::DVec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::filter::gaussian_blur;
use crate::source::InMemorySource;
use crate::tile::{Tile, TileId};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Smooth random texture in [0, 1]: uniform noise blurred with `sigma`.
pub fn texture(width: usize, height: usize, sigma: f32, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Buffer2::from_fn(width, height, |_, _| rng.random::<f32>());
    let blurred = gaussian_blur(&noise, sigma);

    let (lo, hi) = blurred
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = (hi - lo).max(1e-6);
    Buffer2::from_fn(width, height, |x, y| (blurred[(x, y)] - lo) / range)
}

/// Scattered Gaussian blobs on a dark background; gives stable local features.
pub fn blob_field(width: usize, height: usize, count: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let blobs: Vec<(f32, f32, f32, f32)> = (0..count)
        .map(|_| {
            (
                rng.random_range(0.0..width as f32),
                rng.random_range(0.0..height as f32),
                rng.random_range(1.5..4.0),
                rng.random_range(0.4..1.0),
            )
        })
        .collect();

    Buffer2::from_fn(width, height, |x, y| {
        let mut v = 0.05f32;
        for &(bx, by, sigma, amplitude) in &blobs {
            let dx = x as f32 - bx;
            let dy = y as f32 - by;
            let r2 = dx * dx + dy * dy;
            if r2 < 25.0 * sigma * sigma {
                v += amplitude * (-r2 / (2.0 * sigma * sigma)).exp();
            }
        }
        v
    })
}

/// Grid of tiles cut from `global`, row-major.
///
/// Tile `(c, r)` covers `[c * step_x, c * step_x + tile_w) x [r * step_y, r * step_y + tile_h)`.
/// Tiles are returned at the origin; the ground-truth locations are returned separately.
pub struct SyntheticGrid {
    pub tiles: Vec<Tile>,
    pub source: InMemorySource,
    pub truth: Vec<DVec2>,
    pub grid_width: usize,
}

pub fn grid_from_image(
    global: &Buffer2<f32>,
    cols: usize,
    rows: usize,
    tile_w: usize,
    tile_h: usize,
    step_x: usize,
    step_y: usize,
) -> SyntheticGrid {
    assert!((cols - 1) * step_x + tile_w <= global.width());
    assert!((rows - 1) * step_y + tile_h <= global.height());

    let mut tiles = Vec::new();
    let mut source = InMemorySource::new();
    let mut truth = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let id = TileId(r * cols + c);
            let (x, y) = (c * step_x, r * step_y);
            source.insert(id, global.crop(x, y, tile_w, tile_h));
            tiles.push(Tile::new(id, tile_w, tile_h));
            truth.push(DVec2::new(x as f64, y as f64));
        }
    }

    SyntheticGrid {
        tiles,
        source,
        truth,
        grid_width: cols,
    }
}

/// Largest distance between recovered tile locations and the ground truth,
/// after removing the common offset of tile 0.
pub fn max_position_error(tiles: &[Tile], truth: &[DVec2]) -> f64 {
    let offset = tiles[0].location() - truth[0];
    tiles
        .iter()
        .zip(truth)
        .map(|(tile, &t)| (tile.location() - offset).distance(t))
        .fold(0.0, f64::max)
}

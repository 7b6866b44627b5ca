//! Overlap stripes: resampled intensity buffers cut from a tile.
//!
//! A stripe is addressed in the tile's bounding-box space (the tile rendered
//! through its transform, translation removed). Pure-translation tiles are
//! cropped directly; everything else is rendered by mapping each output pixel
//! back through the inverse transform and sampling bilinearly.


use common::Buffer2;
use glam::DVec2;

use crate::filter::{bilinear_sample, downscale, gaussian_blur};
use crate::source::PixelSource;
use crate::tile::Tile;

/// Relative placement of two neighbouring tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The base tile is above the moving tile.
    TopBottom,
    /// The base tile is left of the moving tile.
    LeftRight,
}

/// Integer region in a tile's bounding-box space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn origin(&self) -> DVec2 {
        DVec2::new(self.x as f64, self.y as f64)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Part of the region inside `width x height`.
    pub fn clip(&self, width: usize, height: usize) -> Roi {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = (self.x + self.width).min(width);
        let bottom = (self.y + self.height).min(height);
        Roi::new(x, y, right - x, bottom - y)
    }
}

/// A resampled single-channel region of a tile.
#[derive(Debug, Clone)]
pub struct Stripe {
    pub pixels: Buffer2<f32>,
    /// Region of the tile's bounding-box space the stripe covers.
    pub roi: Roi,
    /// Effective scale of `pixels` relative to full resolution.
    pub scale: f64,
}

impl Stripe {
    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    /// Map a stripe pixel position back to bounding-box space.
    #[inline]
    pub fn to_tile(&self, point: DVec2) -> DVec2 {
        self.roi.origin() + point / self.scale
    }
}

/// Base and moving stripe regions for a pair of `width x height` tiles whose
/// overlap is `overlap` of the tile extent along `direction`.
pub fn stripe_rois(direction: Direction, width: usize, height: usize, overlap: f64) -> (Roi, Roi) {
    match direction {
        Direction::TopBottom => {
            let size = ((height as f64 * overlap).floor() as usize).min(height);
            (
                Roi::new(0, height - size, width, size),
                Roi::new(0, 0, width, size),
            )
        }
        Direction::LeftRight => {
            let size = ((width as f64 * overlap).floor() as usize).min(width);
            (
                Roi::new(width - size, 0, size, height),
                Roi::new(0, 0, size, height),
            )
        }
    }
}

/// Integer extent of a tile's bounding box.
pub fn bounding_extent(tile: &Tile) -> (usize, usize) {
    let bbox = tile.bounding_box();
    (
        bbox.width.round().max(0.0) as usize,
        bbox.height.round().max(0.0) as usize,
    )
}

/// Sample `roi` of `tile` at `scale`, then blur with `blur_sigma` when positive.
///
/// Returns `None` when the region misses the tile, the pixels are unavailable
/// or the scaled stripe would be empty.
pub fn sample(
    source: &dyn PixelSource,
    tile: &Tile,
    roi: Roi,
    scale: f64,
    blur_sigma: f64,
) -> Option<Stripe> {
    let (extent_w, extent_h) = bounding_extent(tile);
    let roi = roi.clip(extent_w, extent_h);
    if roi.is_empty() || scale <= 0.0 {
        return None;
    }

    let level = source.fetch(tile, scale)?;
    let level_scale = level.scale.clamp(f64::MIN_POSITIVE, 1.0);
    let remaining = (scale / level_scale).min(1.0);

    let rendered = if tile.is_pure_translation() && level_scale == 1.0 {
        crop(&level.pixels, roi)?
    } else {
        render(&level.pixels, level_scale, tile, roi)
    };

    let mut pixels = downscale(&rendered, remaining)?;
    if blur_sigma > 0.0 {
        pixels = gaussian_blur(&pixels, blur_sigma as f32);
    }

    let effective_scale = level_scale * remaining;
    Some(Stripe {
        pixels,
        roi,
        scale: effective_scale,
    })
}

fn crop(pixels: &Buffer2<f32>, roi: Roi) -> Option<Buffer2<f32>> {
    let roi = roi.clip(pixels.width(), pixels.height());
    if roi.is_empty() {
        return None;
    }
    Some(pixels.crop(roi.x, roi.y, roi.width, roi.height))
}

// Inverse mapping: bbox space -> world -> raw tile pixels -> pyramid level.
// Pixels that fall outside the tile are zero.
fn render(level: &Buffer2<f32>, level_scale: f64, tile: &Tile, roi: Roi) -> Buffer2<f32> {
    let out_w = ((roi.width as f64 * level_scale).round() as usize).max(1);
    let out_h = ((roi.height as f64 * level_scale).round() as usize).max(1);
    let bbox_origin = tile.location();

    Buffer2::from_fn(out_w, out_h, |u, v| {
        let bbox_point = roi.origin() + DVec2::new(u as f64, v as f64) / level_scale;
        tile.to_local(bbox_origin + bbox_point)
            .and_then(|p| bilinear_sample(level, p.x * level_scale, p.y * level_scale))
            .unwrap_or(0.0)
    })
}

//! Pixel supply for tiles.

use std::collections::HashMap;
use std::sync::Arc;

use common::Buffer2;

use crate::tile::{Tile, TileId};

/// Single-channel image of a tile at some pyramid level.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub pixels: Arc<Buffer2<f32>>,
    /// Scale of `pixels` relative to the full-resolution tile, in (0, 1].
    pub scale: f64,
}

/// Supplies tile pixels on demand.
///
/// Implementations may return a pre-scaled level whose scale is at least the
/// requested one; the sampler decimates the remaining factor itself.
/// `None` means the pixels are unavailable and the pair is treated as unmatched.
pub trait PixelSource: Send + Sync {
    fn fetch(&self, tile: &Tile, scale: f64) -> Option<SourceImage>;
}

/// Full-resolution images kept in memory, keyed by tile id.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    images: HashMap<TileId, Arc<Buffer2<f32>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TileId, pixels: Buffer2<f32>) {
        self.images.insert(id, Arc::new(pixels));
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl PixelSource for InMemorySource {
    fn fetch(&self, tile: &Tile, _scale: f64) -> Option<SourceImage> {
        self.images.get(&tile.id()).map(|pixels| SourceImage {
            pixels: Arc::clone(pixels),
            scale: 1.0,
        })
    }
}

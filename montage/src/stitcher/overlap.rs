use crate::stripe::Direction;
use crate::tile::Tile;

/// Two tiles whose bounding boxes overlap. `base` is the upper or left tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePair {
    pub base: usize,
    pub moving: usize,
    pub direction: Direction,
}

/// All pairs of tiles with intersecting bounding boxes, diagonal neighbours
/// excluded. A pair is top/bottom when the intersection is wider than tall.
pub fn overlapping_pairs(tiles: &[Tile]) -> Vec<TilePair> {
    let boxes: Vec<_> = tiles.iter().map(Tile::bounding_box).collect();
    let mut pairs = Vec::new();

    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let (bi, bj) = (&boxes[i], &boxes[j]);
            let Some(intersection) = bi.intersection(bj) else {
                continue;
            };
            let delta = bj.origin() - bi.origin();
            if delta.x.abs() > bi.width / 2.0 && delta.y.abs() > bi.height / 2.0 {
                continue;
            }

            let pair = if intersection.width > intersection.height {
                let (base, moving) = if delta.y >= 0.0 { (i, j) } else { (j, i) };
                TilePair {
                    base,
                    moving,
                    direction: Direction::TopBottom,
                }
            } else {
                let (base, moving) = if delta.x >= 0.0 { (i, j) } else { (j, i) };
                TilePair {
                    base,
                    moving,
                    direction: Direction::LeftRight,
                }
            };
            pairs.push(pair);
        }
    }

    pairs
}

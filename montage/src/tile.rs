//! Tiles and their placement in the montage.

use std::fmt;
use std::sync::Arc;

use glam::{DAffine2, DMat2, DVec2};

use crate::mesh::CoordinateTransform;

/// Stable tile identity supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub usize);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-aligned rectangle in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn origin(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Overlap with positive area, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Rect::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    #[inline]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    fn from_points(points: impl IntoIterator<Item = DVec2>) -> Rect {
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for p in points {
            min = min.min(p);
            max = max.max(p);
        }
        Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }
}

/// An image tile: pixel extent, placement transform and optional mesh.
///
/// Pixels are not stored here; they come from a [`crate::PixelSource`].
#[derive(Clone)]
pub struct Tile {
    id: TileId,
    width: usize,
    height: usize,
    transform: DAffine2,
    coordinate_transform: Option<Arc<dyn CoordinateTransform>>,
    locked: bool,
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transform", &self.transform)
            .field("has_mesh", &self.coordinate_transform.is_some())
            .field("locked", &self.locked)
            .finish()
    }
}

impl Tile {
    pub fn new(id: TileId, width: usize, height: usize) -> Self {
        Self {
            id,
            width,
            height,
            transform: DAffine2::IDENTITY,
            coordinate_transform: None,
            locked: false,
        }
    }

    pub fn with_location(mut self, x: f64, y: f64) -> Self {
        self.transform.translation = DVec2::new(x, y);
        self
    }

    pub fn with_transform(mut self, transform: DAffine2) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_coordinate_transform(mut self, transform: Arc<dyn CoordinateTransform>) -> Self {
        self.coordinate_transform = Some(transform);
        self
    }

    #[inline]
    pub fn id(&self) -> TileId {
        self.id
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn transform(&self) -> DAffine2 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: DAffine2) {
        self.transform = transform;
    }

    pub fn coordinate_transform(&self) -> Option<&Arc<dyn CoordinateTransform>> {
        self.coordinate_transform.as_ref()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// True when the tile renders as a shifted copy of its pixels.
    pub fn is_pure_translation(&self) -> bool {
        self.coordinate_transform.is_none()
            && self.transform.matrix2.abs_diff_eq(DMat2::IDENTITY, 1e-12)
    }

    /// Map a raw pixel coordinate to world space.
    pub fn to_world(&self, point: DVec2) -> DVec2 {
        let corrected = match &self.coordinate_transform {
            Some(mesh) => mesh.apply(point),
            None => point,
        };
        self.transform.transform_point2(corrected)
    }

    /// Map a world coordinate back to raw pixels.
    pub fn to_local(&self, point: DVec2) -> Option<DVec2> {
        let corrected = self.transform.inverse().transform_point2(point);
        match &self.coordinate_transform {
            Some(mesh) => mesh.apply_inverse(corrected),
            None => Some(corrected),
        }
    }

    /// World-space bounding box of the rendered tile.
    pub fn bounding_box(&self) -> Rect {
        let (w, h) = (self.width as f64, self.height as f64);
        if self.coordinate_transform.is_none() {
            return Rect::from_points(
                [
                    DVec2::ZERO,
                    DVec2::new(w, 0.0),
                    DVec2::new(0.0, h),
                    DVec2::new(w, h),
                ]
                .map(|p| self.transform.transform_point2(p)),
            );
        }

        // A mesh may bulge between corners, so walk the border.
        const BORDER_SAMPLES: usize = 16;
        let border = (0..=BORDER_SAMPLES).flat_map(|i| {
            let t = i as f64 / BORDER_SAMPLES as f64;
            [
                DVec2::new(t * w, 0.0),
                DVec2::new(t * w, h),
                DVec2::new(0.0, t * h),
                DVec2::new(w, t * h),
            ]
        });
        Rect::from_points(border.map(|p| self.to_world(p)))
    }

    /// Top-left corner of the bounding box.
    #[inline]
    pub fn location(&self) -> DVec2 {
        self.bounding_box().origin()
    }

    /// Shift the tile so that its bounding box starts at `location`.
    pub fn set_location(&mut self, location: DVec2) {
        let shift = location - self.location();
        self.transform.translation += shift;
    }

    /// Pre-compose a world-space model: `transform = model * T(-origin) * transform`.
    ///
    /// `origin` is the bounding-box origin the model was expressed relative to.
    pub fn apply_model(&mut self, model: &DAffine2, origin: DVec2) {
        self.transform = *model * DAffine2::from_translation(-origin) * self.transform;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshTransform;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(80.0, 10.0, 100.0, 100.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Rect::new(80.0, 10.0, 20.0, 90.0));
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_touching_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(100.0, 0.0, 100.0, 100.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_bounding_box_of_translated_tile() {
        let tile = Tile::new(TileId(0), 100, 50).with_location(10.0, 20.0);
        assert_eq!(tile.bounding_box(), Rect::new(10.0, 20.0, 100.0, 50.0));
        assert!(tile.is_pure_translation());
    }

    #[test]
    fn test_bounding_box_of_rotated_tile() {
        let tile = Tile::new(TileId(0), 10, 10)
            .with_transform(DAffine2::from_angle(std::f64::consts::FRAC_PI_2));
        let bbox = tile.bounding_box();
        assert!((bbox.x + 10.0).abs() < 1e-9);
        assert!(bbox.y.abs() < 1e-9);
        assert!((bbox.width - 10.0).abs() < 1e-9);
        assert!(!tile.is_pure_translation());
    }

    #[test]
    fn test_set_location_moves_bounding_box() {
        let mut tile = Tile::new(TileId(3), 10, 10)
            .with_transform(DAffine2::from_angle(std::f64::consts::FRAC_PI_2));
        tile.set_location(DVec2::new(50.0, 60.0));
        let loc = tile.location();
        assert!((loc.x - 50.0).abs() < 1e-9);
        assert!((loc.y - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_model_replaces_translation() {
        let mut tile = Tile::new(TileId(1), 100, 100).with_location(78.0, 3.0);
        let origin = tile.location();
        let model = DAffine2::from_translation(DVec2::new(80.0, 0.0));
        tile.apply_model(&model, origin);
        assert_eq!(tile.location(), DVec2::new(80.0, 0.0));
    }

    #[test]
    fn test_world_local_round_trip_with_mesh() {
        let mesh = MeshTransform::new(20.0, 20.0, 2, 2, vec![DVec2::new(0.5, 0.25); 4]);
        let tile = Tile::new(TileId(0), 20, 20)
            .with_location(5.0, 5.0)
            .with_coordinate_transform(Arc::new(mesh));
        let p = DVec2::new(3.0, 7.0);
        let world = tile.to_world(p);
        assert_eq!(world, DVec2::new(8.5, 12.25));
        let back = tile.to_local(world).unwrap();
        assert!(back.distance(p) < 1e-6);
        assert!(!tile.is_pure_translation());
    }
}

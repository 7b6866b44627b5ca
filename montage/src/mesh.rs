//! Non-linear coordinate transforms applied in tile space before the affine.

use glam::DVec2;

/// A coordinate transform layered under a tile's affine.
pub trait CoordinateTransform: std::fmt::Debug + Send + Sync {
    /// Map a point from raw tile pixels into the tile's corrected frame.
    fn apply(&self, point: DVec2) -> DVec2;

    /// Inverse of [`CoordinateTransform::apply`], `None` when it does not converge.
    fn apply_inverse(&self, point: DVec2) -> Option<DVec2>;
}

const INVERSE_MAX_ITERATIONS: usize = 50;
const INVERSE_TOLERANCE: f64 = 1e-6;

/// Displacement field sampled on a regular control grid.
///
/// Control points span `[0, width] x [0, height]` in `cols x rows` nodes;
/// displacements between them are bilinearly interpolated and clamped at the
/// border.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshTransform {
    width: f64,
    height: f64,
    cols: usize,
    rows: usize,
    displacements: Vec<DVec2>,
}

impl MeshTransform {
    pub fn new(
        width: f64,
        height: f64,
        cols: usize,
        rows: usize,
        displacements: Vec<DVec2>,
    ) -> Self {
        assert!(cols >= 2 && rows >= 2, "Mesh needs at least 2x2 control points");
        assert!(width > 0.0 && height > 0.0, "Mesh extent must be positive");
        assert_eq!(
            displacements.len(),
            cols * rows,
            "Displacement count must equal cols * rows"
        );
        Self {
            width,
            height,
            cols,
            rows,
            displacements,
        }
    }

    pub fn identity(width: f64, height: f64, cols: usize, rows: usize) -> Self {
        Self::new(width, height, cols, rows, vec![DVec2::ZERO; cols * rows])
    }

    pub fn displacement_at(&self, point: DVec2) -> DVec2 {
        let gx = (point.x / self.width * (self.cols - 1) as f64).clamp(0.0, (self.cols - 1) as f64);
        let gy = (point.y / self.height * (self.rows - 1) as f64).clamp(0.0, (self.rows - 1) as f64);

        let x0 = (gx.floor() as usize).min(self.cols - 2);
        let y0 = (gy.floor() as usize).min(self.rows - 2);
        let fx = gx - x0 as f64;
        let fy = gy - y0 as f64;

        let d = |x: usize, y: usize| self.displacements[y * self.cols + x];
        let top = d(x0, y0) * (1.0 - fx) + d(x0 + 1, y0) * fx;
        let bottom = d(x0, y0 + 1) * (1.0 - fx) + d(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

impl CoordinateTransform for MeshTransform {
    fn apply(&self, point: DVec2) -> DVec2 {
        point + self.displacement_at(point)
    }

    // Fixed-point iteration q = p - d(q); converges while the field is a contraction.
    fn apply_inverse(&self, point: DVec2) -> Option<DVec2> {
        let mut q = point - self.displacement_at(point);
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let next = point - self.displacement_at(q);
            if next.distance_squared(q) < INVERSE_TOLERANCE * INVERSE_TOLERANCE {
                return Some(next);
            }
            q = next;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_mesh() {
        let mesh = MeshTransform::identity(100.0, 50.0, 3, 3);
        let p = DVec2::new(17.5, 33.0);
        assert_eq!(mesh.apply(p), p);
        assert_eq!(mesh.apply_inverse(p), Some(p));
    }

    #[test]
    fn test_uniform_displacement() {
        let mesh = MeshTransform::new(10.0, 10.0, 2, 2, vec![DVec2::new(1.5, -2.0); 4]);
        let p = DVec2::new(3.0, 4.0);
        assert_eq!(mesh.apply(p), DVec2::new(4.5, 2.0));
        let back = mesh.apply_inverse(DVec2::new(4.5, 2.0)).unwrap();
        assert!(back.distance(p) < 1e-6);
    }

    #[test]
    fn test_bilinear_interpolation_between_nodes() {
        let displacements = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(2.0, 0.0),
            DVec2::new(0.0, 4.0),
            DVec2::new(2.0, 4.0),
        ];
        let mesh = MeshTransform::new(10.0, 10.0, 2, 2, displacements);
        let d = mesh.displacement_at(DVec2::new(5.0, 5.0));
        assert!((d.x - 1.0).abs() < 1e-12);
        assert!((d.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_of_smooth_field() {
        let displacements = (0..9)
            .map(|i| DVec2::new((i % 3) as f64 * 0.8, (i / 3) as f64 * -0.5))
            .collect();
        let mesh = MeshTransform::new(64.0, 64.0, 3, 3, displacements);
        for &p in &[DVec2::new(1.0, 2.0), DVec2::new(40.0, 12.0), DVec2::new(63.0, 63.0)] {
            let forward = mesh.apply(p);
            let back = mesh.apply_inverse(forward).unwrap();
            assert!(back.distance(p) < 1e-4, "{p:?} -> {forward:?} -> {back:?}");
        }
    }
}

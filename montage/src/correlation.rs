//! Shared result type and overlap statistics for the correlation matchers.

use common::Buffer2;
use glam::DVec2;

/// Outcome of a pairwise correlation.
///
/// `dx, dy` is the position of the moving stripe's origin in the base
/// stripe's pixel frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrelationResult {
    Success { dx: f64, dy: f64, score: f64 },
    LowConfidence { dx: f64, dy: f64, score: f64 },
    Failed,
}

impl CorrelationResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, CorrelationResult::Success { .. })
    }

    /// Displacement of a successful match.
    pub fn success_offset(&self) -> Option<DVec2> {
        match *self {
            CorrelationResult::Success { dx, dy, .. } => Some(DVec2::new(dx, dy)),
            _ => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match *self {
            CorrelationResult::Success { score, .. }
            | CorrelationResult::LowConfidence { score, .. } => Some(score),
            CorrelationResult::Failed => None,
        }
    }
}

/// Pearson correlation over the overlap of `a` and `b` with `b`'s origin at
/// `(dx, dy)` in `a`'s frame, i.e. `a(x, y)` against `b(x - dx, y - dy)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OverlapCorrelation {
    /// Number of overlapping pixels.
    pub pixels: usize,
    /// `None` when either side has zero variance over the overlap.
    pub r: Option<f64>,
}

pub(crate) fn overlap_correlation(
    a: &Buffer2<f32>,
    b: &Buffer2<f32>,
    dx: i64,
    dy: i64,
) -> OverlapCorrelation {
    let x0 = dx.max(0);
    let y0 = dy.max(0);
    let x1 = (a.width() as i64).min(dx + b.width() as i64);
    let y1 = (a.height() as i64).min(dy + b.height() as i64);
    if x1 <= x0 || y1 <= y0 {
        return OverlapCorrelation { pixels: 0, r: None };
    }

    let n = ((x1 - x0) * (y1 - y0)) as usize;
    let mut sum_a = 0.0f64;
    let mut sum_b = 0.0f64;
    for y in y0..y1 {
        let row_a = &a.row(y as usize)[x0 as usize..x1 as usize];
        let row_b = &b.row((y - dy) as usize)[(x0 - dx) as usize..(x1 - dx) as usize];
        for (&va, &vb) in row_a.iter().zip(row_b) {
            sum_a += va as f64;
            sum_b += vb as f64;
        }
    }
    let mean_a = sum_a / n as f64;
    let mean_b = sum_b / n as f64;

    let mut covar = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for y in y0..y1 {
        let row_a = &a.row(y as usize)[x0 as usize..x1 as usize];
        let row_b = &b.row((y - dy) as usize)[(x0 - dx) as usize..(x1 - dx) as usize];
        for (&va, &vb) in row_a.iter().zip(row_b) {
            let da = va as f64 - mean_a;
            let db = vb as f64 - mean_b;
            covar += da * db;
            var_a += da * da;
            var_b += db * db;
        }
    }

    let denom = (var_a * var_b).sqrt();
    let r = if denom > 1e-12 && denom.is_finite() {
        Some((covar / denom).clamp(-1.0, 1.0))
    } else {
        None
    };
    OverlapCorrelation { pixels: n, r }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_overlap_is_one() {
        let a = Buffer2::from_fn(10, 8, |x, y| ((x * 7 + y * 13) % 11) as f32);
        let b = a.crop(3, 2, 7, 6);
        let c = overlap_correlation(&a, &b, 3, 2);
        assert_eq!(c.pixels, 42);
        assert!((c.r.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_offset_overlap() {
        let a = Buffer2::from_fn(10, 10, |x, y| ((x * 3 + y * 5) % 7) as f32);
        let b = Buffer2::from_fn(10, 10, |x, y| ((x + 4) * 3 + (y + 1) * 5) as f32 % 7.0);
        // b(x, y) == a(x + 4, y + 1), so b's origin is at (4, 1) in a; its left
        // part hangs off when placed at (-2, 0).
        let c = overlap_correlation(&a, &b, -2, 0);
        assert_eq!(c.pixels, 80);
        let exact = overlap_correlation(&a, &b, 4, 1);
        assert!((exact.r.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverted_is_minus_one() {
        let a = Buffer2::from_fn(6, 6, |x, y| (x * y) as f32);
        let b = Buffer2::from_fn(6, 6, |x, y| -((x * y) as f32));
        let c = overlap_correlation(&a, &b, 0, 0);
        assert!((c.r.unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_overlap_and_flat() {
        let a = Buffer2::new_filled(5, 5, 1.0f32);
        let b = Buffer2::new_filled(5, 5, 2.0f32);
        assert_eq!(overlap_correlation(&a, &b, 5, 0).pixels, 0);
        let flat = overlap_correlation(&a, &b, 1, 1);
        assert_eq!(flat.pixels, 16);
        assert_eq!(flat.r, None);
    }

    #[test]
    fn test_result_accessors() {
        let ok = CorrelationResult::Success {
            dx: 1.0,
            dy: -2.0,
            score: 0.9,
        };
        assert!(ok.is_success());
        assert_eq!(ok.success_offset(), Some(DVec2::new(1.0, -2.0)));
        let low = CorrelationResult::LowConfidence {
            dx: 0.0,
            dy: 0.0,
            score: 0.1,
        };
        assert_eq!(low.success_offset(), None);
        assert_eq!(low.score(), Some(0.1));
        assert_eq!(CorrelationResult::Failed.score(), None);
    }
}

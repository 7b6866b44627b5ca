//! Point correspondences and closed-form weighted model fits.

use glam::{DAffine2, DMat2, DVec2};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Family of 2D transforms a tile model is fitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Pure shift.
    #[default]
    Translation,
    /// Rotation plus shift.
    Rigid,
    /// Full 6-parameter affine.
    Affine,
}

impl ModelKind {
    /// Minimum number of correspondences that determine the model.
    #[inline]
    pub fn min_matches(self) -> usize {
        match self {
            ModelKind::Translation => 1,
            ModelKind::Rigid => 2,
            ModelKind::Affine => 3,
        }
    }
}

/// A pair of corresponding points with a weight.
///
/// `p1` lives in the owning tile's frame, `p2` in the connected tile's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    pub p1: DVec2,
    pub p2: DVec2,
    pub weight: f64,
}

impl PointMatch {
    pub fn new(p1: DVec2, p2: DVec2, weight: f64) -> Self {
        Self { p1, p2, weight }
    }

    /// The same correspondence seen from the connected tile.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            p1: self.p2,
            p2: self.p1,
            weight: self.weight,
        }
    }

    /// World-space distance between both ends under the given models.
    #[inline]
    pub fn distance(&self, own: &DAffine2, other: &DAffine2) -> f64 {
        own.transform_point2(self.p1)
            .distance(other.transform_point2(self.p2))
    }
}

/// Weighted least-squares fit of `T` minimizing `sum w * |T(source) - target|^2`.
///
/// Returns `None` for empty input, non-positive total weight or a degenerate
/// configuration for the requested kind.
pub fn fit(
    kind: ModelKind,
    sources: &[DVec2],
    targets: &[DVec2],
    weights: &[f64],
) -> Option<DAffine2> {
    debug_assert_eq!(sources.len(), targets.len());
    debug_assert_eq!(sources.len(), weights.len());

    if sources.len() < kind.min_matches() {
        return None;
    }

    let (source_centroid, target_centroid, total_weight) =
        weighted_centroids(sources, targets, weights)?;

    match kind {
        ModelKind::Translation => Some(DAffine2::from_translation(
            target_centroid - source_centroid,
        )),
        ModelKind::Rigid => fit_rigid(
            sources,
            targets,
            weights,
            source_centroid,
            target_centroid,
            total_weight,
        ),
        ModelKind::Affine => fit_affine(
            sources,
            targets,
            weights,
            source_centroid,
            target_centroid,
            total_weight,
        ),
    }
}

/// Like [`fit`], but degrades to a translation when the richer fit is degenerate.
pub fn fit_with_fallback(
    kind: ModelKind,
    sources: &[DVec2],
    targets: &[DVec2],
    weights: &[f64],
) -> Option<DAffine2> {
    fit(kind, sources, targets, weights).or_else(|| {
        if kind == ModelKind::Translation {
            None
        } else {
            fit(ModelKind::Translation, sources, targets, weights)
        }
    })
}

fn weighted_centroids(
    sources: &[DVec2],
    targets: &[DVec2],
    weights: &[f64],
) -> Option<(DVec2, DVec2, f64)> {
    let mut total = 0.0;
    let mut sc = DVec2::ZERO;
    let mut tc = DVec2::ZERO;
    for ((&s, &t), &w) in sources.iter().zip(targets).zip(weights) {
        total += w;
        sc += s * w;
        tc += t * w;
    }
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some((sc / total, tc / total, total))
}

fn fit_rigid(
    sources: &[DVec2],
    targets: &[DVec2],
    weights: &[f64],
    source_centroid: DVec2,
    target_centroid: DVec2,
    total_weight: f64,
) -> Option<DAffine2> {
    let mut dot = 0.0;
    let mut cross = 0.0;
    let mut spread = 0.0;
    for ((&s, &t), &w) in sources.iter().zip(targets).zip(weights) {
        let s = s - source_centroid;
        let t = t - target_centroid;
        dot += w * (s.x * t.x + s.y * t.y);
        cross += w * (s.x * t.y - s.y * t.x);
        spread += w * s.length_squared();
    }

    if spread <= 1e-12 * total_weight {
        return None;
    }

    let angle = cross.atan2(dot);
    let rotation = DMat2::from_angle(angle);
    let translation = target_centroid - rotation * source_centroid;
    Some(DAffine2::from_mat2_translation(rotation, translation))
}

fn fit_affine(
    sources: &[DVec2],
    targets: &[DVec2],
    weights: &[f64],
    source_centroid: DVec2,
    target_centroid: DVec2,
    total_weight: f64,
) -> Option<DAffine2> {
    // Centered normal equations: A * Css = Cts
    let mut css = Matrix2::<f64>::zeros();
    let mut cts = Matrix2::<f64>::zeros();
    for ((&s, &t), &w) in sources.iter().zip(targets).zip(weights) {
        let s = s - source_centroid;
        let t = t - target_centroid;
        css[(0, 0)] += w * s.x * s.x;
        css[(0, 1)] += w * s.x * s.y;
        css[(1, 1)] += w * s.y * s.y;
        cts[(0, 0)] += w * t.x * s.x;
        cts[(0, 1)] += w * t.x * s.y;
        cts[(1, 0)] += w * t.y * s.x;
        cts[(1, 1)] += w * t.y * s.y;
    }
    css[(1, 0)] = css[(0, 1)];

    let trace = css.trace();
    if trace <= 1e-12 * total_weight || css.determinant() <= 1e-9 * trace * trace {
        return None;
    }

    let inverse = css.try_inverse()?;
    let a = cts * inverse;
    let linear = DMat2::from_cols(
        DVec2::new(a[(0, 0)], a[(1, 0)]),
        DVec2::new(a[(0, 1)], a[(1, 1)]),
    );
    if !linear.determinant().is_finite() || linear.determinant().abs() < 1e-12 {
        return None;
    }
    let translation = target_centroid - linear * source_centroid;
    Some(DAffine2::from_mat2_translation(linear, translation))
}

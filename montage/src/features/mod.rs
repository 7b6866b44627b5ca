//! Feature-based registration of two stripes.
//!
//! Keypoints are extracted from both stripes, matched by descriptor distance
//! and fitted with RANSAC under a growing inlier threshold. A fit is only
//! accepted when its inliers cover the stripes about as widely as all
//! matches do; a model explained by one local cluster is rejected.


pub mod extract;
pub mod matching;
pub mod ransac;

use glam::{DAffine2, DVec2};
use nalgebra::{Matrix2, SymmetricEigen};

use crate::cancel::CancelToken;
use crate::config::FeatureConfig;
use crate::error::Result;
use crate::model::PointMatch;
use crate::stripe::Stripe;

pub use extract::{extract_features, FeatureDescriptor, DESCRIPTOR_LEN};
pub use matching::match_descriptors;
pub use ransac::{RansacConfig, RansacEstimator, RansacResult};

/// Convergence rounds without an inlier gain before the epsilon loop may stop.
const CONVERGENCE_ROUNDS: usize = 4;

/// A fitted transform with the correspondences that support it.
///
/// `transform` maps points of the first stripe onto the second; each inlier
/// has `p1` in the first stripe and `p2` in the second.
#[derive(Debug, Clone)]
pub struct AffineModel {
    pub transform: DAffine2,
    pub inliers: Vec<PointMatch>,
}

/// Feature extraction, matching and robust fitting.
#[derive(Debug, Clone)]
pub struct FeatureMatcher {
    config: FeatureConfig,
}

impl FeatureMatcher {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Register stripe `b` against stripe `a`. Inlier points are in stripe pixels.
    pub fn match_stripes(
        &self,
        a: &Stripe,
        b: &Stripe,
        cancel: &CancelToken,
    ) -> Result<Option<AffineModel>> {
        let features_a = extract_features(&a.pixels, &self.config);
        cancel.check()?;
        let features_b = extract_features(&b.pixels, &self.config);
        cancel.check()?;

        let pairs = match_descriptors(&features_a, &features_b, self.config.ratio);
        tracing::debug!(
            features_a = features_a.len(),
            features_b = features_b.len(),
            matches = pairs.len(),
            "Feature matching"
        );

        let points_a: Vec<DVec2> = pairs.iter().map(|&(i, _)| features_a[i].location).collect();
        let points_b: Vec<DVec2> = pairs.iter().map(|&(_, j)| features_b[j].location).collect();
        self.fit_correspondences(&points_a, &points_b, a.scale, cancel)
    }

    /// Robust fit of `points_b ≈ T(points_a)` with the growing-epsilon loop.
    ///
    /// `scale` converts the full-resolution epsilon into point units.
    pub fn fit_correspondences(
        &self,
        points_a: &[DVec2],
        points_b: &[DVec2],
        scale: f64,
        cancel: &CancelToken,
    ) -> Result<Option<AffineModel>> {
        let config = &self.config;
        if points_a.len() < config.model.min_matches() {
            return Ok(None);
        }

        let mut epsilon = 0.0;
        let mut round = 0u64;
        let mut convergence_count = 0;
        let mut best_count = 0;
        // Best model so far among those spread like the whole match set.
        let mut accepted: Option<(RansacResult, f64)> = None;
        let mut rejected_spread = None;

        loop {
            epsilon += config.min_epsilon;
            let estimator = RansacEstimator::new(RansacConfig {
                iterations: config.iterations,
                inlier_threshold: epsilon * scale,
                min_inlier_ratio: config.min_inlier_ratio,
                seed: config.seed.map(|s| s.wrapping_add(round)),
            });
            round += 1;

            let result = estimator.estimate(points_a, points_b, config.model, cancel)?;
            let count = result.as_ref().map_or(0, |r| r.inliers.len());
            if count <= best_count {
                convergence_count += 1;
            } else {
                convergence_count = 0;
                best_count = count;
            }

            let spread = result
                .as_ref()
                .map(|r| model_spread(points_a, points_b, &r.inliers));
            tracing::trace!(epsilon, count, convergence_count, ?spread, "Epsilon round");

            if let (Some(result), Some(spread)) = (result, spread) {
                if spread > config.max_spread_ratio {
                    rejected_spread = Some((spread, count));
                } else if accepted
                    .as_ref()
                    .is_none_or(|(best, _)| count > best.inliers.len())
                {
                    accepted = Some((result, spread));
                }
            }

            let keep_going = accepted.is_none() || convergence_count < CONVERGENCE_ROUNDS;
            if !(keep_going && epsilon < config.max_epsilon) {
                break;
            }
        }

        let Some((result, spread)) = accepted else {
            if let Some((spread, inliers)) = rejected_spread {
                tracing::debug!(
                    spread,
                    inliers,
                    "Rejecting feature model confined to a local cluster"
                );
            }
            return Ok(None);
        };
        tracing::trace!(spread, inliers = result.inliers.len(), "Feature model accepted");

        let inliers = result
            .inliers
            .iter()
            .map(|&i| PointMatch::new(points_a[i], points_b[i], 1.0))
            .collect();
        Ok(Some(AffineModel {
            transform: result.transform,
            inliers,
        }))
    }
}

fn model_spread(points_a: &[DVec2], points_b: &[DVec2], inliers: &[usize]) -> f64 {
    let inliers_a: Vec<DVec2> = inliers.iter().map(|&i| points_a[i]).collect();
    let inliers_b: Vec<DVec2> = inliers.iter().map(|&i| points_b[i]).collect();
    spread_ratio(points_a, &inliers_a).max(spread_ratio(points_b, &inliers_b))
}

/// How much narrower (or wider) `subset` is spread than `all`.
///
/// Standard deviations along the principal axes of both point sets are
/// compared axis by axis; each ratio is folded to be at least 1 and the two
/// axes are averaged. 1 means identical spread; degenerate input yields
/// `f64::MAX`.
pub fn spread_ratio(all: &[DVec2], subset: &[DVec2]) -> f64 {
    let (Some(all_dev), Some(subset_dev)) = (principal_deviations(all), principal_deviations(subset))
    else {
        return f64::MAX;
    };

    let fold = |r: f64| if r < 1.0 { 1.0 / r } else { r };
    let ratio = 0.5 * (fold(subset_dev[0] / all_dev[0]) + fold(subset_dev[1] / all_dev[1]));
    if ratio.is_finite() {
        ratio
    } else {
        f64::MAX
    }
}

/// Square roots of the covariance eigenvalues, largest first.
fn principal_deviations(points: &[DVec2]) -> Option<[f64; 2]> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().copied().sum::<DVec2>() / n;
    let mut covariance = Matrix2::<f64>::zeros();
    for p in points {
        let d = *p - mean;
        covariance[(0, 0)] += d.x * d.x;
        covariance[(0, 1)] += d.x * d.y;
        covariance[(1, 1)] += d.y * d.y;
    }
    covariance[(1, 0)] = covariance[(0, 1)];
    covariance /= n;

    let eigen = SymmetricEigen::new(covariance);
    let mut values = [
        eigen.eigenvalues[0].max(0.0).sqrt(),
        eigen.eigenvalues[1].max(0.0).sqrt(),
    ];
    values.sort_by(|a, b| b.total_cmp(a));
    Some(values)
}

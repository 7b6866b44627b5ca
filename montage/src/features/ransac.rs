//! RANSAC (Random Sample Consensus) for robust model estimation.
//!
//! Repeatedly fits a model to a random minimal sample, counts the
//! correspondences it explains within the inlier threshold, keeps the best
//! hypothesis and finally refits it on its inliers.

use glam::{DAffine2, DVec2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::{fit, ModelKind};

/// RANSAC configuration.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Number of random hypotheses.
    pub iterations: usize,
    /// Inlier distance threshold in pixels.
    pub inlier_threshold: f64,
    /// Minimum inlier ratio to accept a model.
    pub min_inlier_ratio: f64,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            inlier_threshold: 2.0,
            min_inlier_ratio: 0.05,
            seed: None,
        }
    }
}

/// Result of RANSAC estimation.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Best transform, mapping reference points onto target points.
    pub transform: DAffine2,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
}

/// RANSAC estimator for robust transform fitting.
pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    /// Estimate a `kind` transform with `target ≈ T(reference)`.
    ///
    /// Returns `None` when no hypothesis reaches the minimum inlier ratio.
    /// Cancellation is checked once per trial.
    pub fn estimate(
        &self,
        ref_points: &[DVec2],
        target_points: &[DVec2],
        kind: ModelKind,
        cancel: &CancelToken,
    ) -> Result<Option<RansacResult>> {
        debug_assert_eq!(ref_points.len(), target_points.len());
        let n = ref_points.len();
        let min_samples = kind.min_matches();
        if n < min_samples {
            return Ok(None);
        }

        let mut rng: ChaCha8Rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };

        let unit_weights = vec![1.0; min_samples];
        let mut sample_indices: Vec<usize> = Vec::with_capacity(min_samples);
        let mut sample_ref: Vec<DVec2> = Vec::with_capacity(min_samples);
        let mut sample_target: Vec<DVec2> = Vec::with_capacity(min_samples);

        let mut best: Option<(DAffine2, usize)> = None;

        for _ in 0..self.config.iterations {
            cancel.check()?;

            random_sample_into(&mut rng, n, min_samples, &mut sample_indices);
            sample_ref.clear();
            sample_target.clear();
            for &i in &sample_indices {
                sample_ref.push(ref_points[i]);
                sample_target.push(target_points[i]);
            }

            let Some(transform) = fit(kind, &sample_ref, &sample_target, &unit_weights) else {
                continue;
            };

            let count = count_inliers(
                ref_points,
                target_points,
                &transform,
                self.config.inlier_threshold,
            );
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((transform, count));
            }
        }

        let Some((hypothesis, count)) = best else {
            return Ok(None);
        };
        if count < min_samples || (count as f64 / n as f64) < self.config.min_inlier_ratio {
            return Ok(None);
        }

        // Final refinement with least squares on all inliers
        let inliers = inlier_indices(
            ref_points,
            target_points,
            &hypothesis,
            self.config.inlier_threshold,
        );
        let inlier_ref: Vec<DVec2> = inliers.iter().map(|&i| ref_points[i]).collect();
        let inlier_target: Vec<DVec2> = inliers.iter().map(|&i| target_points[i]).collect();
        let weights = vec![1.0; inliers.len()];

        let refined = fit(kind, &inlier_ref, &inlier_target, &weights)
            .map(|t| {
                let refined_inliers = inlier_indices(
                    ref_points,
                    target_points,
                    &t,
                    self.config.inlier_threshold,
                );
                (t, refined_inliers)
            })
            .filter(|(_, refined_inliers)| refined_inliers.len() >= inliers.len());

        let (transform, inliers) = refined.unwrap_or((hypothesis, inliers));
        Ok(Some(RansacResult { transform, inliers }))
    }
}

/// Randomly sample k unique indices from 0..n into pre-allocated buffer.
///
/// The buffer is cleared and filled with k random unique indices.
pub(crate) fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm for sampling without replacement
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}

#[inline]
fn is_inlier(reference: DVec2, target: DVec2, transform: &DAffine2, threshold_sq: f64) -> bool {
    transform.transform_point2(reference).distance_squared(target) < threshold_sq
}

fn count_inliers(
    ref_points: &[DVec2],
    target_points: &[DVec2],
    transform: &DAffine2,
    threshold: f64,
) -> usize {
    let threshold_sq = threshold * threshold;
    ref_points
        .iter()
        .zip(target_points)
        .filter(|(&r, &t)| is_inlier(r, t, transform, threshold_sq))
        .count()
}

fn inlier_indices(
    ref_points: &[DVec2],
    target_points: &[DVec2],
    transform: &DAffine2,
    threshold: f64,
) -> Vec<usize> {
    let threshold_sq = threshold * threshold;
    ref_points
        .iter()
        .zip(target_points)
        .enumerate()
        .filter(|(_, (&r, &t))| is_inlier(r, t, transform, threshold_sq))
        .map(|(i, _)| i)
        .collect()
}

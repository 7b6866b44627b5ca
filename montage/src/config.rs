//! Configuration types for the stitching engine.
//!
//! All parameters are carried by an explicit [`StitchingConfig`] value that is
//! passed to every call. Configs can be loaded from YAML; missing fields take
//! their defaults.

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::model::ModelKind;

/// Smallest correlation coefficient accepted by phase correlation.
pub const DEFAULT_MIN_R: f64 = 0.4;

/// How tile pairs are chosen and registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingRule {
    /// Raster grid; each tile is registered to its left and top neighbours.
    #[default]
    Grid,
    /// Arbitrary layout; overlapping tiles are registered with local features.
    Free,
}

// =============================================================================
// Top-level configuration
// =============================================================================

/// Configuration for a stitching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchingConfig {
    /// Expected overlap between neighbouring tiles as a fraction of tile size.
    pub percent_overlap: f64,
    /// Working scale for pairwise matching, in (0, 1].
    pub scale: f64,
    /// Horizontal overlap in pixels assumed when a left/right pair cannot be registered.
    pub default_overlap_x: f64,
    /// Vertical overlap in pixels assumed when a top/bottom pair cannot be registered.
    pub default_overlap_y: f64,
    /// Run the global optimizer after greedy placement.
    pub optimize: bool,
    pub rule: PairingRule,
    pub phase_correlation: PhaseCorrelationConfig,
    pub cross_correlation: CrossCorrelationConfig,
    pub features: FeatureConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for StitchingConfig {
    fn default() -> Self {
        Self {
            percent_overlap: 0.2,
            scale: 1.0,
            default_overlap_x: 0.0,
            default_overlap_y: 0.0,
            optimize: true,
            rule: PairingRule::Grid,
            phase_correlation: PhaseCorrelationConfig::default(),
            cross_correlation: CrossCorrelationConfig::default(),
            features: FeatureConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl StitchingConfig {
    /// Parse a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_yml::from_str(yaml).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigurationError> {
        serde_yml::to_string(self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check(
            "percent_overlap",
            self.percent_overlap > 0.0 && self.percent_overlap <= 1.0,
            || format!("must be in (0, 1], got {}", self.percent_overlap),
        )?;
        check("scale", self.scale > 0.0 && self.scale <= 1.0, || {
            format!("must be in (0, 1], got {}", self.scale)
        })?;
        check(
            "default_overlap_x",
            self.default_overlap_x.is_finite() && self.default_overlap_x >= 0.0,
            || format!("must be a non-negative pixel count, got {}", self.default_overlap_x),
        )?;
        check(
            "default_overlap_y",
            self.default_overlap_y.is_finite() && self.default_overlap_y >= 0.0,
            || format!("must be a non-negative pixel count, got {}", self.default_overlap_y),
        )?;
        self.phase_correlation.validate()?;
        self.cross_correlation.validate()?;
        self.features.validate()?;
        self.optimizer.validate()
    }
}

fn check(
    name: &'static str,
    ok: bool,
    reason: impl FnOnce() -> String,
) -> Result<(), ConfigurationError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidParameter {
            name,
            reason: reason(),
        })
    }
}

// =============================================================================
// Phase correlation
// =============================================================================

/// Phase correlation and overlap escalation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseCorrelationConfig {
    /// Minimum correlation coefficient for a successful match.
    pub min_r: f64,
    /// Number of correlation peaks verified in real space.
    pub n_peaks: usize,
    /// Overlap increment between retries.
    pub overlap_step: f64,
    /// Gaussian sigma applied to stripes before matching.
    pub stripe_blur_sigma: f64,
}

impl Default for PhaseCorrelationConfig {
    fn default() -> Self {
        Self {
            min_r: DEFAULT_MIN_R,
            n_peaks: 5,
            overlap_step: 0.1,
            stripe_blur_sigma: 1.0,
        }
    }
}

impl PhaseCorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check("phase_correlation.min_r", (0.0..=1.0).contains(&self.min_r), || {
            format!("must be in [0, 1], got {}", self.min_r)
        })?;
        check("phase_correlation.n_peaks", self.n_peaks >= 1, || {
            format!("must be at least 1, got {}", self.n_peaks)
        })?;
        check(
            "phase_correlation.overlap_step",
            self.overlap_step > 0.0 && self.overlap_step <= 1.0,
            || format!("must be in (0, 1], got {}", self.overlap_step),
        )?;
        check(
            "phase_correlation.stripe_blur_sigma",
            self.stripe_blur_sigma.is_finite() && self.stripe_blur_sigma >= 0.0,
            || format!("must be non-negative, got {}", self.stripe_blur_sigma),
        )
    }
}

// =============================================================================
// Cross correlation
// =============================================================================

/// Spatial cross-correlation fallback parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossCorrelationConfig {
    /// Try cross correlation after phase correlation gave up.
    pub enabled: bool,
    /// The fallback runs at `scale / scale_divisor`.
    pub scale_divisor: f64,
}

impl Default for CrossCorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale_divisor: 3.0,
        }
    }
}

impl CrossCorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check(
            "cross_correlation.scale_divisor",
            self.scale_divisor >= 1.0,
            || format!("must be at least 1, got {}", self.scale_divisor),
        )
    }
}

// =============================================================================
// Feature matching
// =============================================================================

/// Local-feature extraction and robust fitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Inlier threshold increment per round, in full-resolution pixels.
    pub min_epsilon: f64,
    /// The threshold stops growing once it reaches this value.
    pub max_epsilon: f64,
    /// RANSAC trials per round.
    pub iterations: usize,
    pub min_inlier_ratio: f64,
    /// Largest accepted spread ratio between inliers and all matches.
    pub max_spread_ratio: f64,
    /// A match is kept when `nearest * ratio < second_nearest`.
    pub ratio: f64,
    /// Model fitted between stripes.
    pub model: ModelKind,
    /// Octaves are built while the shorter image side is at least this long.
    pub min_octave_size: usize,
    /// Difference-of-Gaussians contrast threshold on the normalized image.
    pub contrast_threshold: f32,
    /// Principal curvature ratio above which edge responses are rejected.
    pub edge_ratio: f32,
    /// RANSAC seed for reproducible runs (None for random).
    pub seed: Option<u64>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_epsilon: 2.0,
            max_epsilon: 100.0,
            iterations: 1000,
            min_inlier_ratio: 0.05,
            max_spread_ratio: 2.0,
            ratio: 1.5,
            model: ModelKind::Affine,
            min_octave_size: 32,
            contrast_threshold: 0.02,
            edge_ratio: 10.0,
            seed: None,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check(
            "features.min_epsilon",
            self.min_epsilon > 0.0 && self.min_epsilon <= self.max_epsilon,
            || {
                format!(
                    "must satisfy 0 < min_epsilon <= max_epsilon, got {} and {}",
                    self.min_epsilon, self.max_epsilon
                )
            },
        )?;
        check("features.iterations", self.iterations > 0, || {
            "must be positive".to_string()
        })?;
        check(
            "features.min_inlier_ratio",
            self.min_inlier_ratio > 0.0 && self.min_inlier_ratio <= 1.0,
            || format!("must be in (0, 1], got {}", self.min_inlier_ratio),
        )?;
        check(
            "features.max_spread_ratio",
            self.max_spread_ratio >= 1.0,
            || format!("must be at least 1, got {}", self.max_spread_ratio),
        )?;
        check("features.ratio", self.ratio >= 1.0, || {
            format!("must be at least 1, got {}", self.ratio)
        })?;
        check("features.min_octave_size", self.min_octave_size >= 8, || {
            format!("must be at least 8, got {}", self.min_octave_size)
        })?;
        check(
            "features.edge_ratio",
            self.edge_ratio > 1.0,
            || format!("must be greater than 1, got {}", self.edge_ratio),
        )
    }
}

// =============================================================================
// Global optimizer
// =============================================================================

/// Global relaxation and outlier-removal parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Change of the mean error regarded as no progress.
    pub tolerance: f64,
    /// Consecutive no-progress sweeps before stopping.
    pub plateau_width: usize,
    /// An edge is dropped while its worst match exceeds `mean_factor` times the mean error.
    pub mean_factor: f64,
    /// Errors below this many pixels are never treated as outliers.
    pub min_outlier_distance: f64,
    /// Model family for tiles placed by feature matching.
    pub free_model: ModelKind,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 0.001,
            plateau_width: 50,
            mean_factor: 2.5,
            min_outlier_distance: 1.0,
            free_model: ModelKind::Affine,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check("optimizer.max_iterations", self.max_iterations > 0, || {
            "must be positive".to_string()
        })?;
        check("optimizer.tolerance", self.tolerance >= 0.0, || {
            format!("must be non-negative, got {}", self.tolerance)
        })?;
        check("optimizer.plateau_width", self.plateau_width > 0, || {
            "must be positive".to_string()
        })?;
        check("optimizer.mean_factor", self.mean_factor >= 1.0, || {
            format!("must be at least 1, got {}", self.mean_factor)
        })?;
        check(
            "optimizer.min_outlier_distance",
            self.min_outlier_distance >= 0.0,
            || format!("must be non-negative, got {}", self.min_outlier_distance),
        )
    }
}

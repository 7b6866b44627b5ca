//! Phase correlation between two stripes.
//!
//! Phase correlation finds the translation between images by:
//! 1. Mirror-extending each stripe by a quarter of its size on every side and
//!    tapering the mirrored margin, then zero-padding into an `n x n` square
//! 2. Computing the normalized cross-power spectrum of their 2D FFTs
//! 3. Taking the strongest local maxima of the inverse transform
//! 4. Resolving each peak's wrap-around ambiguity by real-space correlation
//!
//! A peak at `(px, py)` can mean a shift of `px` or `px - n` (same for y).
//! The peak and its 8 neighbours are each expanded into all four candidates,
//! scored with the Pearson coefficient of the overlapping original pixels,
//! and the best one wins. The stripe pixels themselves are never attenuated,
//! so the peak is not pulled toward smaller shifts.


use std::sync::Arc;

use common::Buffer2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::cancel::CancelToken;
use crate::config::PhaseCorrelationConfig;
use crate::correlation::{overlap_correlation, CorrelationResult};
use crate::error::Result;
use crate::filter::mirror;

/// Candidates overlapping less than this fraction of the smaller stripe score zero.
const MIN_OVERLAP_FRACTION: f64 = 0.01;

/// Peak centre first, then its 8 neighbours.
const NEIGHBOURHOOD: [(i64, i64); 9] = [
    (0, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Phase correlation matcher with a success threshold and peak budget.
#[derive(Debug, Clone)]
pub struct PhaseCorrelationMatcher {
    min_r: f64,
    n_peaks: usize,
}

impl PhaseCorrelationMatcher {
    pub fn new(min_r: f64, n_peaks: usize) -> Self {
        Self {
            min_r,
            n_peaks: n_peaks.max(1),
        }
    }

    pub fn from_config(config: &PhaseCorrelationConfig) -> Self {
        Self::new(config.min_r, config.n_peaks)
    }

    /// Register `moving` against `base`.
    ///
    /// The returned displacement is the position of `moving`'s origin in
    /// `base`'s pixel frame. Cancellation is checked once per candidate.
    pub fn correlate(
        &self,
        base: &Buffer2<f32>,
        moving: &Buffer2<f32>,
        cancel: &CancelToken,
    ) -> Result<CorrelationResult> {
        if base.is_empty() || moving.is_empty() {
            return Ok(CorrelationResult::Failed);
        }

        let base_ext = MirrorExtended::new(base);
        let moving_ext = MirrorExtended::new(moving);
        let max_dim = base_ext
            .width()
            .max(base_ext.height())
            .max(moving_ext.width())
            .max(moving_ext.height());
        let correlator = PhaseCorrelator::new(max_dim.next_power_of_two());
        let surface = correlator.correlation_surface(&base_ext, &moving_ext);
        let peaks = find_peaks(&surface, correlator.fft_size, self.n_peaks);

        let n = correlator.fft_size as i64;
        // Surface shifts refer to the extended origins.
        let origin_x = moving_ext.margin_x as i64 - base_ext.margin_x as i64;
        let origin_y = moving_ext.margin_y as i64 - base_ext.margin_y as i64;
        let min_overlap = MIN_OVERLAP_FRACTION
            * (base.width().min(moving.width()) * base.height().min(moving.height())) as f64;

        let mut seen: Vec<(i64, i64)> = Vec::new();
        let mut best: Option<(f64, i64, i64)> = None;
        for &(px, py, _) in &peaks {
            for (ox, oy) in NEIGHBOURHOOD {
                let sx = (px as i64 + ox).rem_euclid(n);
                let sy = (py as i64 + oy).rem_euclid(n);
                for cy in [sy, sy - n] {
                    for cx in [sx, sx - n] {
                        let (dx, dy) = (cx + origin_x, cy + origin_y);
                        if seen.contains(&(dx, dy)) {
                            continue;
                        }
                        seen.push((dx, dy));
                        cancel.check()?;

                        let overlap = overlap_correlation(base, moving, dx, dy);
                        if overlap.pixels == 0 {
                            continue;
                        }
                        let r = if (overlap.pixels as f64) < min_overlap {
                            0.0
                        } else {
                            overlap.r.unwrap_or(0.0).clamp(0.0, 1.0)
                        };
                        // Strictly greater: taller peaks and peak centres win ties.
                        if best.is_none_or(|(best_r, _, _)| r > best_r) {
                            best = Some((r, dx, dy));
                        }
                    }
                }
            }
        }

        let result = match best {
            None => CorrelationResult::Failed,
            Some((score, dx, dy)) if score >= self.min_r => CorrelationResult::Success {
                dx: dx as f64,
                dy: dy as f64,
                score,
            },
            Some((score, dx, dy)) => CorrelationResult::LowConfidence {
                dx: dx as f64,
                dy: dy as f64,
                score,
            },
        };
        tracing::trace!(?result, peaks = peaks.len(), fft_size = n, "Phase correlation");
        Ok(result)
    }
}

/// FFT plans for one square transform size.
struct PhaseCorrelator {
    fft_size: usize,
    forward_fft: Arc<dyn Fft<f32>>,
    inverse_fft: Arc<dyn Fft<f32>>,
}

impl PhaseCorrelator {
    fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward_fft = planner.plan_fft_forward(fft_size);
        let inverse_fft = planner.plan_fft_inverse(fft_size);
        Self {
            fft_size,
            forward_fft,
            inverse_fft,
        }
    }

    /// Inverse transform of the normalized cross-power spectrum; peaks sit at
    /// the position of `moving`'s extended origin in `base`'s extended frame
    /// modulo `n`.
    fn correlation_surface(&self, base: &MirrorExtended, moving: &MirrorExtended) -> Vec<f32> {
        let base_fft = self.fft_2d(&self.prepare_image(base));
        let moving_fft = self.fft_2d(&self.prepare_image(moving));
        let cross_power = cross_power_spectrum(&base_fft, &moving_fft);
        self.ifft_2d(cross_power)
    }

    /// Copy the tapered extended image into the top-left of an `n x n` zero square.
    fn prepare_image(&self, image: &MirrorExtended) -> Vec<f32> {
        let n = self.fft_size;
        let width = image.width();
        let window_x = taper_window(width, image.margin_x);
        let window_y = taper_window(image.height(), image.margin_y);
        let mut padded = vec![0.0f32; n * n];

        for (y, &wy) in window_y.iter().enumerate() {
            let row = image.pixels.row(y);
            let dst = &mut padded[y * n..y * n + width];
            for ((d, &v), &wx) in dst.iter_mut().zip(row).zip(&window_x) {
                *d = v * wx * wy;
            }
        }
        padded
    }

    fn fft_2d(&self, image: &[f32]) -> Vec<Complex<f32>> {
        let n = self.fft_size;
        let mut data: Vec<Complex<f32>> = image.iter().map(|&v| Complex::new(v, 0.0)).collect();

        for row in data.chunks_exact_mut(n) {
            self.forward_fft.process(row);
        }
        transpose_inplace(&mut data, n);
        for row in data.chunks_exact_mut(n) {
            self.forward_fft.process(row);
        }
        transpose_inplace(&mut data, n);

        data
    }

    fn ifft_2d(&self, mut work: Vec<Complex<f32>>) -> Vec<f32> {
        let n = self.fft_size;

        for row in work.chunks_exact_mut(n) {
            self.inverse_fft.process(row);
        }
        transpose_inplace(&mut work, n);
        for row in work.chunks_exact_mut(n) {
            self.inverse_fft.process(row);
        }
        transpose_inplace(&mut work, n);

        let norm = 1.0 / (n * n) as f32;
        work.iter().map(|c| c.re * norm).collect()
    }
}

/// `F1 * conj(F2) / |F1 * conj(F2)|`, zero where the magnitude vanishes.
fn cross_power_spectrum(fft1: &[Complex<f32>], fft2: &[Complex<f32>]) -> Vec<Complex<f32>> {
    fft1.iter()
        .zip(fft2.iter())
        .map(|(&a, &b)| {
            let product = a * b.conj();
            let magnitude = product.norm();
            if magnitude > 1e-10 {
                product / magnitude
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect()
}

/// The `count` highest local maxima of a periodic `n x n` surface, tallest first.
///
/// A local maximum is not smaller than any of its 8 wrap-around neighbours.
fn find_peaks(surface: &[f32], n: usize, count: usize) -> Vec<(usize, usize, f32)> {
    let at = |x: isize, y: isize| -> f32 {
        let xx = x.rem_euclid(n as isize) as usize;
        let yy = y.rem_euclid(n as isize) as usize;
        surface[yy * n + xx]
    };

    let mut peaks = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let v = surface[y * n + x];
            if !v.is_finite() {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            let is_max = (-1..=1).all(|oy| {
                (-1..=1).all(|ox| (ox == 0 && oy == 0) || at(xi + ox, yi + oy) <= v)
            });
            if is_max {
                peaks.push((x, y, v));
            }
        }
    }

    // Stable sort keeps raster order among equal heights.
    peaks.sort_by(|a, b| b.2.total_cmp(&a.2));
    peaks.truncate(count);
    peaks
}

/// A stripe surrounded by its own mirror image.
///
/// Each side grows by `margin = ceil(dim / 8)`, so the extended size is about
/// `dim * 5 / 4`.
struct MirrorExtended {
    pixels: Buffer2<f32>,
    margin_x: usize,
    margin_y: usize,
}

impl MirrorExtended {
    fn new(image: &Buffer2<f32>) -> Self {
        let (width, height) = (image.width(), image.height());
        let margin_x = width.div_ceil(8);
        let margin_y = height.div_ceil(8);
        let pixels = Buffer2::from_fn(width + 2 * margin_x, height + 2 * margin_y, |x, y| {
            let sx = mirror(x as isize - margin_x as isize, width);
            let sy = mirror(y as isize - margin_y as isize, height);
            image[(sx, sy)]
        });
        Self {
            pixels,
            margin_x,
            margin_y,
        }
    }

    fn width(&self) -> usize {
        self.pixels.width()
    }

    fn height(&self) -> usize {
        self.pixels.height()
    }
}

/// Window of `size` samples that is 1 except over `margin` samples at each end,
/// where a raised cosine falls toward 0 at the outer edge.
fn taper_window(size: usize, margin: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let from_edge = i.min(size - 1 - i);
            if from_edge >= margin {
                return 1.0;
            }
            let t = (from_edge + 1) as f32 / (margin + 1) as f32;
            0.5 * (1.0 - (std::f32::consts::PI * t).cos())
        })
        .collect()
}

/// Transpose an `n x n` matrix in place.
fn transpose_inplace(data: &mut [Complex<f32>], n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            data.swap(i * n + j, j * n + i);
        }
    }
}

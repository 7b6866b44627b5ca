//! Scale-invariant keypoints and gradient-histogram descriptors.

use std::f64::consts::PI;

use common::Buffer2;
use glam::{DVec2, DVec3};

use crate::config::FeatureConfig;
use crate::filter::{gaussian_blur, halve};

pub const DESCRIPTOR_LEN: usize = 128;

const INITIAL_SIGMA: f64 = 1.6;
/// Blur assumed to be present in the input image.
const ASSUMED_BLUR: f64 = 0.5;
const SCALES_PER_OCTAVE: usize = 3;
const ORIENTATION_BINS: usize = 36;
/// Secondary orientation peaks above this fraction of the maximum spawn extra keypoints.
const ORIENTATION_PEAK_RATIO: f32 = 0.8;
const DESCRIPTOR_CELLS: usize = 4;
const DESCRIPTOR_BINS: usize = 8;
const DESCRIPTOR_CLAMP: f32 = 0.2;
const BORDER: usize = 2;

/// A keypoint with its 128-element descriptor.
///
/// `location` and `scale` are in the pixel frame of the image the feature was
/// extracted from.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    pub location: DVec2,
    pub scale: f64,
    pub orientation: f64,
    pub descriptor: [f32; DESCRIPTOR_LEN],
}

impl FeatureDescriptor {
    #[inline]
    pub fn distance(&self, other: &FeatureDescriptor) -> f32 {
        self.descriptor
            .iter()
            .zip(other.descriptor.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Detect difference-of-Gaussians extrema and describe them.
///
/// The result is sorted by location so that identical input yields identical
/// output order.
pub fn extract_features(image: &Buffer2<f32>, config: &FeatureConfig) -> Vec<FeatureDescriptor> {
    let Some(normalized) = normalize(image) else {
        return Vec::new();
    };

    let initial_blur = (INITIAL_SIGMA * INITIAL_SIGMA - ASSUMED_BLUR * ASSUMED_BLUR).sqrt();
    let mut base = gaussian_blur(&normalized, initial_blur as f32);
    let mut features = Vec::new();
    let mut octave = 0;

    while base.width().min(base.height()) >= config.min_octave_size {
        let gaussians = build_gaussians(&base);
        let dogs: Vec<Buffer2<f32>> = gaussians
            .windows(2)
            .map(|pair| difference(&pair[1], &pair[0]))
            .collect();

        detect_octave(&gaussians, &dogs, octave, config, &mut features);

        base = halve(&gaussians[SCALES_PER_OCTAVE]);
        octave += 1;
    }

    features.sort_by(|a, b| {
        a.location
            .x
            .total_cmp(&b.location.x)
            .then(a.location.y.total_cmp(&b.location.y))
            .then(a.orientation.total_cmp(&b.orientation))
    });
    features
}

fn normalize(image: &Buffer2<f32>) -> Option<Buffer2<f32>> {
    let (lo, hi) = image
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if image.is_empty() || !range.is_finite() || range < 1e-12 {
        return None;
    }
    Some(Buffer2::from_fn(image.width(), image.height(), |x, y| {
        (image[(x, y)] - lo) / range
    }))
}

#[inline]
fn octave_sigma(level: usize) -> f64 {
    INITIAL_SIGMA * 2f64.powf(level as f64 / SCALES_PER_OCTAVE as f64)
}

fn build_gaussians(base: &Buffer2<f32>) -> Vec<Buffer2<f32>> {
    let mut gaussians = Vec::with_capacity(SCALES_PER_OCTAVE + 3);
    gaussians.push(base.clone());
    for level in 1..SCALES_PER_OCTAVE + 3 {
        let previous = octave_sigma(level - 1);
        let current = octave_sigma(level);
        let increment = (current * current - previous * previous).sqrt();
        let next = gaussian_blur(&gaussians[level - 1], increment as f32);
        gaussians.push(next);
    }
    gaussians
}

fn difference(a: &Buffer2<f32>, b: &Buffer2<f32>) -> Buffer2<f32> {
    Buffer2::from_fn(a.width(), a.height(), |x, y| a[(x, y)] - b[(x, y)])
}

fn detect_octave(
    gaussians: &[Buffer2<f32>],
    dogs: &[Buffer2<f32>],
    octave: usize,
    config: &FeatureConfig,
    out: &mut Vec<FeatureDescriptor>,
) {
    let (width, height) = (dogs[0].width(), dogs[0].height());
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return;
    }
    let threshold = config.contrast_threshold / SCALES_PER_OCTAVE as f32;
    let octave_factor = 2f64.powi(octave as i32);

    for level in 1..=SCALES_PER_OCTAVE {
        for y in BORDER..height - BORDER {
            for x in BORDER..width - BORDER {
                let v = dogs[level][(x, y)];
                if v.abs() <= 0.5 * threshold || !is_extremum(dogs, level, x, y) {
                    continue;
                }
                let Some((offset, value)) = refine(dogs, level, x, y) else {
                    continue;
                };
                if value.abs() < threshold || is_edge(&dogs[level], x, y, config.edge_ratio) {
                    continue;
                }

                let sigma = octave_sigma(level) * 2f64.powf(offset.z / SCALES_PER_OCTAVE as f64);
                let position = DVec2::new(x as f64 + offset.x, y as f64 + offset.y);
                let image = &gaussians[level];

                for angle in orientations(image, x, y, sigma) {
                    if let Some(descriptor) = describe(image, position, sigma, angle) {
                        out.push(FeatureDescriptor {
                            location: position * octave_factor,
                            scale: sigma * octave_factor,
                            orientation: angle,
                            descriptor,
                        });
                    }
                }
            }
        }
    }
}

fn is_extremum(dogs: &[Buffer2<f32>], level: usize, x: usize, y: usize) -> bool {
    let v = dogs[level][(x, y)];
    let mut is_max = true;
    let mut is_min = true;
    for (layer, dog) in dogs[level - 1..=level + 1].iter().enumerate() {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if layer == 1 && nx == x && ny == y {
                    continue;
                }
                let n = dog[(nx, ny)];
                is_max &= v > n;
                is_min &= v < n;
                if !is_max && !is_min {
                    return false;
                }
            }
        }
    }
    true
}

/// Per-axis parabolic refinement in x, y and scale.
///
/// Returns the offset and the interpolated response; `None` when the true
/// extremum lies closer to a neighbouring sample.
fn refine(dogs: &[Buffer2<f32>], level: usize, x: usize, y: usize) -> Option<(DVec3, f32)> {
    let d = |l: usize, xx: usize, yy: usize| dogs[l][(xx, yy)] as f64;
    let c = d(level, x, y);

    let axis = |minus: f64, plus: f64| -> (f64, f64) {
        let gradient = 0.5 * (plus - minus);
        let curvature = plus + minus - 2.0 * c;
        let offset = if curvature.abs() > 1e-12 {
            -gradient / curvature
        } else {
            0.0
        };
        (offset, gradient)
    };

    let (ox, gx) = axis(d(level, x - 1, y), d(level, x + 1, y));
    let (oy, gy) = axis(d(level, x, y - 1), d(level, x, y + 1));
    let (os, gs) = axis(d(level - 1, x, y), d(level + 1, x, y));

    if ox.abs() > 0.5 || oy.abs() > 0.5 || os.abs() > 0.5 {
        return None;
    }
    let value = c + 0.5 * (gx * ox + gy * oy + gs * os);
    Some((DVec3::new(ox, oy, os), value as f32))
}

fn is_edge(dog: &Buffer2<f32>, x: usize, y: usize, edge_ratio: f32) -> bool {
    let c = dog[(x, y)];
    let dxx = dog[(x + 1, y)] + dog[(x - 1, y)] - 2.0 * c;
    let dyy = dog[(x, y + 1)] + dog[(x, y - 1)] - 2.0 * c;
    let dxy = 0.25
        * (dog[(x + 1, y + 1)] - dog[(x - 1, y + 1)] - dog[(x + 1, y - 1)]
            + dog[(x - 1, y - 1)]);
    let trace = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    det <= 0.0 || trace * trace * edge_ratio >= (edge_ratio + 1.0) * (edge_ratio + 1.0) * det
}

#[inline]
fn gradient(image: &Buffer2<f32>, x: usize, y: usize) -> (f64, f64) {
    let gx = image[(x + 1, y)] - image[(x - 1, y)];
    let gy = image[(x, y + 1)] - image[(x, y - 1)];
    let magnitude = ((gx * gx + gy * gy) as f64).sqrt();
    (magnitude, (gy as f64).atan2(gx as f64))
}

/// Dominant gradient orientations around a keypoint.
fn orientations(image: &Buffer2<f32>, x: usize, y: usize, sigma: f64) -> Vec<f64> {
    let weight_sigma = 1.5 * sigma;
    let radius = (3.0 * weight_sigma).round() as isize;
    let (width, height) = (image.width() as isize, image.height() as isize);
    let mut histogram = [0.0f32; ORIENTATION_BINS];

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (px, py) = (x as isize + dx, y as isize + dy);
            if px < 1 || py < 1 || px >= width - 1 || py >= height - 1 {
                continue;
            }
            let (magnitude, angle) = gradient(image, px as usize, py as usize);
            let weight = (-((dx * dx + dy * dy) as f64) / (2.0 * weight_sigma * weight_sigma)).exp();
            let bin = ((angle + PI) / (2.0 * PI) * ORIENTATION_BINS as f64).floor() as usize
                % ORIENTATION_BINS;
            histogram[bin] += (magnitude * weight) as f32;
        }
    }

    // Light circular smoothing.
    let smoothed: Vec<f32> = (0..ORIENTATION_BINS)
        .map(|i| {
            let prev = histogram[(i + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
            let next = histogram[(i + 1) % ORIENTATION_BINS];
            0.25 * prev + 0.5 * histogram[i] + 0.25 * next
        })
        .collect();

    let max = smoothed.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }

    let mut angles = Vec::new();
    for i in 0..ORIENTATION_BINS {
        let prev = smoothed[(i + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
        let next = smoothed[(i + 1) % ORIENTATION_BINS];
        let v = smoothed[i];
        if v > prev && v > next && v >= ORIENTATION_PEAK_RATIO * max {
            let denom = prev - 2.0 * v + next;
            let shift = if denom.abs() > 1e-12 {
                0.5 * (prev - next) / denom
            } else {
                0.0
            };
            let bin = i as f64 + 0.5 + shift as f64;
            angles.push(bin / ORIENTATION_BINS as f64 * 2.0 * PI - PI);
        }
    }
    angles
}

/// 4x4 spatial cells of 8-bin orientation histograms, rotated to `angle`.
fn describe(
    image: &Buffer2<f32>,
    position: DVec2,
    sigma: f64,
    angle: f64,
) -> Option<[f32; DESCRIPTOR_LEN]> {
    let cell_width = 3.0 * sigma;
    let half_cells = DESCRIPTOR_CELLS as f64 / 2.0;
    let radius = (cell_width * std::f64::consts::SQRT_2 * (half_cells + 0.5)).round() as isize;
    let (cos_a, sin_a) = (angle.cos(), angle.sin());
    let (width, height) = (image.width() as isize, image.height() as isize);
    let (cx, cy) = (position.x.round() as isize, position.y.round() as isize);
    let weight_sigma = half_cells;

    let mut hist = [0.0f32; DESCRIPTOR_LEN];
    let mut samples = 0usize;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (px, py) = (cx + dx, cy + dy);
            if px < 1 || py < 1 || px >= width - 1 || py >= height - 1 {
                continue;
            }
            let ox = px as f64 - position.x;
            let oy = py as f64 - position.y;
            // Rotate into the keypoint frame, in cell units.
            let rx = (cos_a * ox + sin_a * oy) / cell_width;
            let ry = (-sin_a * ox + cos_a * oy) / cell_width;
            let col = rx + half_cells - 0.5;
            let row = ry + half_cells - 0.5;
            let cells = DESCRIPTOR_CELLS as f64;
            if col <= -1.0 || col >= cells || row <= -1.0 || row >= cells {
                continue;
            }

            let (magnitude, grad_angle) = gradient(image, px as usize, py as usize);
            let weight = (-(rx * rx + ry * ry) / (2.0 * weight_sigma * weight_sigma)).exp();
            let mut relative = (grad_angle - angle).rem_euclid(2.0 * PI);
            if relative >= 2.0 * PI {
                relative = 0.0;
            }
            let obin = relative / (2.0 * PI) * DESCRIPTOR_BINS as f64;

            accumulate(&mut hist, row, col, obin, magnitude * weight);
            samples += 1;
        }
    }

    if samples == 0 {
        return None;
    }
    normalize_descriptor(&mut hist)?;
    for v in hist.iter_mut() {
        *v = v.min(DESCRIPTOR_CLAMP);
    }
    normalize_descriptor(&mut hist)?;
    Some(hist)
}

// Trilinear distribution over (row, col, orientation) bins.
fn accumulate(hist: &mut [f32; DESCRIPTOR_LEN], row: f64, col: f64, obin: f64, value: f64) {
    let (r0, c0, o0) = (row.floor(), col.floor(), obin.floor());
    let (fr, fc, fo) = (row - r0, col - c0, obin - o0);

    for (ri, wr) in [(r0 as isize, 1.0 - fr), (r0 as isize + 1, fr)] {
        if ri < 0 || ri >= DESCRIPTOR_CELLS as isize {
            continue;
        }
        for (ci, wc) in [(c0 as isize, 1.0 - fc), (c0 as isize + 1, fc)] {
            if ci < 0 || ci >= DESCRIPTOR_CELLS as isize {
                continue;
            }
            for (oi, wo) in [(o0 as usize, 1.0 - fo), (o0 as usize + 1, fo)] {
                let oi = oi % DESCRIPTOR_BINS;
                let index = (ri as usize * DESCRIPTOR_CELLS + ci as usize) * DESCRIPTOR_BINS + oi;
                hist[index] += (value * wr * wc * wo) as f32;
            }
        }
    }
}

fn normalize_descriptor(hist: &mut [f32; DESCRIPTOR_LEN]) -> Option<()> {
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 1e-12 || !norm.is_finite() {
        return None;
    }
    for v in hist.iter_mut() {
        *v /= norm;
    }
    Some(())
}

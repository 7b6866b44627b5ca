//! Separable Gaussian smoothing and decimation for stripes and scale spaces.

use common::Buffer2;
use rayon::prelude::*;

const ROWS_PER_CHUNK: usize = 8;

/// Compute a normalized 1D Gaussian kernel with radius `ceil(3 * sigma)`.
pub fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "Sigma must be positive");

    let radius = (3.0 * sigma).ceil() as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..2 * radius + 1)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Reflect an index into `0..len` without repeating the edge sample.
#[inline]
pub(crate) fn mirror(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = i.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Separable Gaussian blur with mirrored borders. Rows are processed in parallel.
pub fn gaussian_blur(image: &Buffer2<f32>, sigma: f32) -> Buffer2<f32> {
    let (width, height) = (image.width(), image.height());
    if sigma <= 0.0 || image.is_empty() {
        return image.clone();
    }

    let kernel = gaussian_kernel_1d(sigma);
    let radius = kernel.len() as isize / 2;

    let mut temp = vec![0.0f32; width * height];
    temp.par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let in_row = image.row(y_start + local_y);
                for (x, out) in out_row.iter_mut().enumerate() {
                    let mut sum = 0.0f32;
                    for (k, &kval) in kernel.iter().enumerate() {
                        let sx = mirror(x as isize + k as isize - radius, width);
                        sum += in_row[sx] * kval;
                    }
                    *out = sum;
                }
            }
        });

    let mut output = vec![0.0f32; width * height];
    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let y = (y_start + local_y) as isize;
                for (x, out) in out_row.iter_mut().enumerate() {
                    let mut sum = 0.0f32;
                    for (k, &kval) in kernel.iter().enumerate() {
                        let sy = mirror(y + k as isize - radius, height);
                        sum += temp[sy * width + x] * kval;
                    }
                    *out = sum;
                }
            }
        });

    Buffer2::new(width, height, output)
}

/// Sigma that makes a Gaussian equivalent to area averaging before scaling by `scale`.
#[inline]
pub fn downscale_sigma(scale: f64) -> f64 {
    (0.25 / (scale * scale) - 0.25).max(0.0).sqrt()
}

/// Anti-aliased downscale: Gaussian pre-blur, then nearest-neighbour decimation
/// to `floor(dim * scale)`.
///
/// Returns `None` when the result would be empty.
pub fn downscale(image: &Buffer2<f32>, scale: f64) -> Option<Buffer2<f32>> {
    if scale >= 1.0 {
        return Some(image.clone());
    }
    let out_w = (image.width() as f64 * scale).floor() as usize;
    let out_h = (image.height() as f64 * scale).floor() as usize;
    if out_w == 0 || out_h == 0 {
        return None;
    }

    let blurred = gaussian_blur(image, downscale_sigma(scale) as f32);
    let max_x = image.width() - 1;
    let max_y = image.height() - 1;
    Some(Buffer2::from_fn(out_w, out_h, |x, y| {
        let sx = ((x as f64 / scale) as usize).min(max_x);
        let sy = ((y as f64 / scale) as usize).min(max_y);
        blurred[(sx, sy)]
    }))
}

/// Keep every second pixel in both directions.
pub fn halve(image: &Buffer2<f32>) -> Buffer2<f32> {
    let out_w = (image.width() / 2).max(1);
    let out_h = (image.height() / 2).max(1);
    Buffer2::from_fn(out_w, out_h, |x, y| image[(2 * x, 2 * y)])
}

/// Bilinear sample at a fractional position; `None` outside the image.
pub fn bilinear_sample(image: &Buffer2<f32>, x: f64, y: f64) -> Option<f32> {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 || x < -0.5 || y < -0.5 || x > w as f64 - 0.5 || y > h as f64 - 0.5 {
        return None;
    }
    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let top = image[(x0, y0)] * (1.0 - fx) + image[(x1, y0)] * fx;
    let bottom = image[(x0, y1)] * (1.0 - fx) + image[(x1, y1)] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalized() {
        for &sigma in &[0.5f32, 1.0, 1.6, 3.2] {
            let kernel = gaussian_kernel_1d(sigma);
            let sum: f32 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(kernel.len(), 2 * (3.0 * sigma).ceil() as usize + 1);
        }
    }

    #[test]
    fn test_mirror_indices() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(-2, 5), 2);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(6, 5), 2);
        assert_eq!(mirror(3, 1), 0);
        // Wider than the image itself
        assert_eq!(mirror(-7, 3), 1);
    }

    #[test]
    fn test_blur_preserves_constant() {
        let image = Buffer2::new_filled(13, 3, 2.5f32);
        let blurred = gaussian_blur(&image, 1.6);
        assert!(blurred.iter().all(|&v| (v - 2.5).abs() < 1e-5));
    }

    #[test]
    fn test_blur_spreads_impulse() {
        let mut image = Buffer2::new_filled(21, 21, 0.0f32);
        image[(10, 10)] = 1.0;
        let blurred = gaussian_blur(&image, 1.0);
        let total: f32 = blurred.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(blurred[(10, 10)] < 1.0);
        assert!(blurred[(11, 10)] > 0.0);
        assert!((blurred[(9, 10)] - blurred[(11, 10)]).abs() < 1e-6);
    }

    #[test]
    fn test_downscale_dimensions() {
        let image = Buffer2::from_fn(100, 40, |x, y| (x + y) as f32);
        let small = downscale(&image, 1.0 / 3.0).unwrap();
        assert_eq!(small.width(), 33);
        assert_eq!(small.height(), 13);
        assert!(downscale(&image, 0.01).is_none());
    }

    #[test]
    fn test_downscale_sigma() {
        assert_eq!(downscale_sigma(1.0), 0.0);
        assert!((downscale_sigma(0.5) - 0.75f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_bilinear_sample() {
        let image = Buffer2::new(2, 2, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(bilinear_sample(&image, 0.5, 0.5), Some(1.5));
        assert_eq!(bilinear_sample(&image, 1.0, 0.0), Some(1.0));
        assert_eq!(bilinear_sample(&image, 2.0, 0.0), None);
    }
}

use std::ops::{Deref, Index, IndexMut};
use std::slice;

/// Row-major 2D buffer of pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every pixel in row-major order.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
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
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.pixels.iter()
    }

    /// Pixels of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    /// Copy out the `width x height` region starting at `(x, y)`.
    ///
    /// The region must lie inside the buffer.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Self {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop region exceeds buffer bounds"
        );
        let mut pixels = Vec::with_capacity(width * height);
        for row in y..y + height {
            let start = row * self.width + x;
            pixels.extend_from_slice(&self.pixels[start..start + width]);
        }
        Self {
            pixels,
            width,
            height,
        }
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self::new_filled(width, height, T::default())
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

impl<T> From<Buffer2<T>> for Vec<T> {
    #[inline]
    fn from(buffer: Buffer2<T>) -> Self {
        buffer.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf.len(), 6);
        assert!(!buf.is_empty());
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let buf = Buffer2::from_fn(3, 2, |x, y| x + 10 * y);
        assert_eq!(buf.pixels(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(buf[(2, 1)], 12);
    }

    #[test]
    fn test_row() {
        let buf = Buffer2::from_fn(4, 3, |x, y| (x + 4 * y) as f32);
        assert_eq!(buf.row(1), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_crop_copies_region() {
        let buf = Buffer2::from_fn(5, 4, |x, y| x + 10 * y);
        let crop = buf.crop(1, 2, 3, 2);
        assert_eq!(crop.width(), 3);
        assert_eq!(crop.height(), 2);
        assert_eq!(crop.pixels(), &[21, 22, 23, 31, 32, 33]);
    }

    #[test]
    #[should_panic(expected = "crop region exceeds buffer bounds")]
    fn test_crop_out_of_bounds_panics() {
        let buf = Buffer2::new_filled(4, 4, 0u8);
        buf.crop(2, 2, 3, 1);
    }

    #[test]
    fn test_get_mut_2d() {
        let mut buf = Buffer2::new(2, 2, vec![1, 2, 3, 4]);
        *buf.get_mut(1, 0) = 99;
        assert_eq!(*buf.get(1, 0), 99);
        assert_eq!(*buf.get(0, 0), 1);
    }

    #[test]
    fn test_new_default_is_zeroed() {
        let buf: Buffer2<f32> = Buffer2::new_default(4, 3);
        assert_eq!(buf.len(), 12);
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_into_vec() {
        let buf = Buffer2::new(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]);
        let v: Vec<f32> = buf.into();
        assert_eq!(v, vec![1.0, 2.0, 3.0, 4.0]);
    }
}

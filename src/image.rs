// image.rs — Host-side pixel grids for the depth pipeline.
//
// Two pixel kinds flow through the pipeline:
//
//   ColorImage     Image<Rgba>  4 interleaved 8-bit channels (R, G, B, A)
//   GreyImage      Image<u8>    1 channel, intensity
//   DisparityImage Image<u8>    1 channel, horizontal offset in pixels
//
// Layout is row-major, origin top-left, no row padding: the element for
// (x, y) lives at index `y * width + x`. The GPU side relies on this — an
// image is uploaded with a single contiguous copy, never row by row.
//
// `Rgba` is `#[repr(C)]` + `bytemuck::Pod`, so `&[Rgba]` reinterprets as
// `&[u8]` (and back) without copying. That is how the codec hands packed
// RGBA bytes to us and how the staging buffers are filled.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel Trait
// ---------------------------------------------------------------------------

/// Trait for types that can serve as pixel values in an [`Image`].
///
/// `Pod` lets every image be viewed as raw bytes for device transfers.
pub trait Pixel: Copy + Default + PartialEq + Send + Sync + bytemuck::Pod + 'static {
    /// Number of 8-bit channels in one pixel.
    const CHANNELS: usize;
}

impl Pixel for u8 {
    const CHANNELS: usize = 1;
}

/// One RGBA pixel, 8 bits per channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba { r, g, b, a }
    }

    /// Opaque grey `(v, v, v, 255)`.
    pub const fn grey(v: u8) -> Self {
        Rgba { r: v, g: v, b: v, a: 255 }
    }
}

impl Pixel for Rgba {
    const CHANNELS: usize = 4;
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over pixel type `T`.
#[derive(Clone, PartialEq)]
pub struct Image<T: Pixel> {
    /// Pixel data in row-major order. Length = width * height.
    data: Vec<T>,
    width: usize,
    height: usize,
}

pub type ColorImage = Image<Rgba>;
pub type GreyImage = Image<u8>;
pub type DisparityImage = Image<u8>;

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image.
    pub fn new(width: usize, height: usize) -> Self {
        Image {
            data: vec![T::default(); width * height],
            width,
            height,
        }
    }

    /// Create an image where every pixel holds `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Create an image from an existing pixel vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image { data, width, height }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image { data, width, height }
    }

    /// Reinterpret packed bytes (`CHANNELS` bytes per pixel) as an image.
    ///
    /// Returns `None` when the byte count does not match the dimensions.
    pub fn from_bytes(width: usize, height: usize, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != width * height * T::CHANNELS {
            return None;
        }
        // pod_collect_to_vec copies, so the source needs no particular alignment.
        let data: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
        Some(Image { data, width, height })
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the pixel value at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    /// Set the pixel at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    /// Borrow a single row as a slice.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    /// Iterate over all pixels as `(x, y, value)` tuples.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let w = self.width.max(1);
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % w, i / w, v))
    }

    /// Row-major pixel slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// The pixel grid as packed bytes (`CHANNELS` bytes per pixel).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

// Small images print their top-left corner; handy in assertion failures.
impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        write!(f, "}}")
    }
}

impl<T: Pixel> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.width + x]
    }
}

impl<T: Pixel> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.width + x;
        &mut self.data[idx]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_u8() {
        let img: GreyImage = Image::new(4, 3);
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.len(), 12);
        assert!(img.pixels().all(|(_, _, v)| v == 0));
    }

    #[test]
    fn test_rgba_is_four_bytes() {
        assert_eq!(std::mem::size_of::<Rgba>(), 4);
        assert_eq!(<Rgba as Pixel>::CHANNELS, 4);
        assert_eq!(<u8 as Pixel>::CHANNELS, 1);
    }

    #[test]
    fn test_from_bytes_interleaved_order() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let img = ColorImage::from_bytes(2, 1, &bytes).unwrap();
        assert_eq!(img.get(0, 0), Rgba::new(1, 2, 3, 4));
        assert_eq!(img.get(1, 0), Rgba::new(5, 6, 7, 8));
        assert_eq!(img.as_bytes(), &bytes);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(ColorImage::from_bytes(2, 2, &[0u8; 15]).is_none());
        assert!(GreyImage::from_bytes(2, 2, &[0u8; 5]).is_none());
    }

    #[test]
    fn test_from_fn_row_major() {
        let img = GreyImage::from_fn(3, 2, |x, y| (x + 10 * y) as u8);
        assert_eq!(img.as_slice(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(img.row(1), &[10, 11, 12]);
    }

    #[test]
    fn test_pixels_iterator_coordinates() {
        let img = GreyImage::from_fn(3, 2, |x, y| (x * y) as u8);
        let coords: Vec<(usize, usize)> = img.pixels().map(|(x, y, _)| (x, y)).collect();
        assert_eq!(coords[0], (0, 0));
        assert_eq!(coords[2], (2, 0));
        assert_eq!(coords[3], (0, 1));
        assert_eq!(coords.len(), 6);
    }

    #[test]
    fn test_index_mut_write() {
        let mut img: GreyImage = Image::new(2, 2);
        img[(1, 0)] = 7;
        assert_eq!(img.get(1, 0), 7);
        assert_eq!(img.as_slice(), &[0, 7, 0, 0]);
    }

    #[test]
    fn test_grey_rgba() {
        assert_eq!(Rgba::grey(9), Rgba::new(9, 9, 9, 255));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        let img: GreyImage = Image::new(2, 2);
        img.get(2, 0);
    }

    #[test]
    #[should_panic(expected = "data length")]
    fn test_from_vec_length_mismatch() {
        let _ = GreyImage::from_vec(3, 3, vec![0; 8]);
    }
}

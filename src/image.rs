// image.rs — Interleaved multi-channel image buffers.
//
// Three flavours share one memory layout:
//
//   Image<T>            owned buffer (accumulators, transformed copies)
//   ImageView<'a, T>    borrowed, read-only (the caller's input)
//   ImageViewMut<'a, T> borrowed, writable (the caller's output)
//
// Layout: row-major, channels interleaved, no row padding.
//
//   data index:  0  1  2 | 3  4  5 | 6  7  8 ...
//   sample:      R  G  B | R  G  B | R  G  B
//   pixel:       (0,0)   | (1,0)   | (2,0)
//
//   index(x, y, c) = (y * width + x) * channels + c
//
// The upscaler borrows the caller's buffers for the duration of one call
// instead of copying them, so the views are the public face of the crate.
// Owned images are only built internally for TTA transforms and the f32
// blending buffer.

use std::fmt;

use crate::error::{Result, UpscaleError};

// ---------------------------------------------------------------------------
// Pixel trait
// ---------------------------------------------------------------------------

/// Sample types an image can hold.
///
/// `u8` is the caller-facing pixel format; `f32` is used for unrounded
/// accumulation so that rounding happens once, at the very end.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Raw value as f32 (not normalized).
    fn to_f32(self) -> f32;

    /// Construct from an f32 value, clamping and rounding where the type
    /// requires it.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        // Clamp first: `as u8` saturates but NaN would become 0 silently.
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

fn check_len(len: usize, width: usize, height: usize, channels: usize) -> Result<()> {
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| UpscaleError::Input(format!("image size {width}×{height}×{channels} overflows")))?;
    if len != expected {
        return Err(UpscaleError::Input(format!(
            "buffer holds {len} samples, {width}×{height}×{channels} needs {expected}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// An owned interleaved image.
pub struct Image<T: Pixel> {
    data: Vec<T>,
    width: usize,
    height: usize,
    channels: usize,
}

// Deep copy of heap data; implemented by hand to keep it visible.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Image {
            data: vec![T::default(); width * height * channels],
            width,
            height,
            channels,
        }
    }

    /// Create a zero-initialized image, reporting allocation failure as a
    /// resource error. Used for output-sized buffers, which can be large.
    pub fn try_new(width: usize, height: usize, channels: usize) -> Result<Self> {
        let len = width * height * channels;
        let data = crate::error::try_alloc(len, "image buffer")?;
        Ok(Image { data, width, height, channels })
    }

    /// Wrap an existing sample vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height * channels`.
    pub fn from_vec(width: usize, height: usize, channels: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height * channels,
            "data length ({}) must equal width * height * channels ({})",
            data.len(),
            width * height * channels,
        );
        Image { data, width, height, channels }
    }

    /// Fallible counterpart of [`Image::from_vec`] for caller-supplied data.
    pub fn try_from_vec(width: usize, height: usize, channels: usize, data: Vec<T>) -> Result<Self> {
        check_len(data.len(), width, height, channels)?;
        Ok(Image { data, width, height, channels })
    }

    /// Image filled with one pixel value repeated everywhere.
    pub fn filled(width: usize, height: usize, pixel: &[T]) -> Self {
        let channels = pixel.len();
        let mut data = Vec::with_capacity(width * height * channels);
        for _ in 0..width * height {
            data.extend_from_slice(pixel);
        }
        Image { data, width, height, channels }
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
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Sample at (x, y, c).
    ///
    /// # Panics
    /// Panics if out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        self.data[self.index(x, y, c)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, value: T) {
        let idx = self.index(x, y, c);
        self.data[idx] = value;
    }

    /// All channels of pixel (x, y).
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[T] {
        let start = self.index(x, y, 0);
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [T] {
        let start = self.index(x, y, 0);
        &mut self.data[start..start + self.channels]
    }

    /// One row, all channels interleaved.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let len = self.width * self.channels;
        &self.data[y * len..(y + 1) * len]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let len = self.width * self.channels;
        &mut self.data[y * len..(y + 1) * len]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Borrow as a read-only view.
    pub fn view(&self) -> ImageView<'_, T> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }

    /// Borrow as a writable view.
    pub fn view_mut(&mut self) -> ImageViewMut<'_, T> {
        ImageViewMut {
            data: &mut self.data,
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize, c: usize) -> usize {
        assert!(
            x < self.width && y < self.height && c < self.channels,
            "sample ({x},{y},{c}) out of bounds for image {}×{}×{}",
            self.width,
            self.height,
            self.channels,
        );
        (y * self.width + x) * self.channels + c
    }
}

// Debug formatting — prints the top-left corner, enough for test failures.
impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.channels,
        )?;
        for y in 0..self.height.min(4) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(6) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.pixel(x, y))?;
            }
            if self.width > 6 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 4 {
            writeln!(f, "  ...")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// ImageView<'a, T>
// ---------------------------------------------------------------------------

/// A borrowed, read-only interleaved image.
///
/// The lifetime ties the view to the caller's buffer: the upscaler can read
/// it for the duration of one call and cannot keep it.
#[derive(Clone, Copy)]
pub struct ImageView<'a, T: Pixel> {
    data: &'a [T],
    width: usize,
    height: usize,
    channels: usize,
}

impl<'a, T: Pixel> ImageView<'a, T> {
    /// Wrap a caller buffer. Fails if its length does not match the
    /// declared dimensions.
    pub fn new(data: &'a [T], width: usize, height: usize, channels: usize) -> Result<Self> {
        check_len(data.len(), width, height, channels)?;
        Ok(ImageView { data, width, height, channels })
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
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        self.data[(y * self.width + x) * self.channels + c]
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &'a [T] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &'a [T] {
        let len = self.width * self.channels;
        &self.data[y * len..(y + 1) * len]
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Copy into an owned image.
    pub fn to_image(&self) -> Image<T> {
        Image::from_vec(self.width, self.height, self.channels, self.data.to_vec())
    }
}

// ---------------------------------------------------------------------------
// ImageViewMut<'a, T>
// ---------------------------------------------------------------------------

/// A borrowed, writable interleaved image — the caller's output buffer.
pub struct ImageViewMut<'a, T: Pixel> {
    data: &'a mut [T],
    width: usize,
    height: usize,
    channels: usize,
}

impl<'a, T: Pixel> ImageViewMut<'a, T> {
    pub fn new(data: &'a mut [T], width: usize, height: usize, channels: usize) -> Result<Self> {
        check_len(data.len(), width, height, channels)?;
        Ok(ImageViewMut { data, width, height, channels })
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
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        self.data[(y * self.width + x) * self.channels + c]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, value: T) {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        self.data[(y * self.width + x) * self.channels + c] = value;
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [T] {
        let start = (y * self.width + x) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let len = self.width * self.channels;
        &mut self.data[y * len..(y + 1) * len]
    }

    pub fn as_view(&self) -> ImageView<'_, T> {
        ImageView {
            data: self.data,
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// tensor.rs — Planar CHW f32 tensors, the network's activation format.
//
// Layout: channel-major, then rows, then columns.
//
//   index(c, y, x) = (c * height + y) * width + x
//
// Planar storage keeps each channel contiguous, which is what both the CPU
// convolution loops and the WGSL kernels want: one output channel is one
// contiguous slice and one dispatch z-slice.

use crate::error::{try_alloc, Result, UpscaleError};

/// A dense `channels × height × width` f32 tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    channels: usize,
    height: usize,
    width: usize,
}

impl Tensor {
    /// Zero-filled tensor. Allocation failure is reported, not aborted on:
    /// activation tensors scale with the tile size.
    pub fn zeros(channels: usize, height: usize, width: usize) -> Result<Self> {
        let len = channels * height * width;
        let data = try_alloc(len, "tensor")?;
        Ok(Tensor { data, channels, height, width })
    }

    /// Wrap an existing buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != channels * height * width`.
    pub fn from_vec(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            channels * height * width,
            "tensor data length must equal {channels}×{height}×{width}",
        );
        Tensor { data, channels, height, width }
    }

    /// Fallible counterpart of [`Tensor::from_vec`].
    pub fn try_from_vec(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(UpscaleError::Input(format!(
                "tensor data holds {} values, {channels}×{height}×{width} needs {}",
                data.len(),
                channels * height * width
            )));
        }
        Ok(Tensor { data, channels, height, width })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// `(channels, height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    #[inline]
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, v: f32) {
        self.data[(c * self.height + y) * self.width + x] = v;
    }

    /// One channel as a contiguous `height × width` slice.
    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        let n = self.plane_len();
        &self.data[c * n..(c + 1) * n]
    }

    #[inline]
    pub fn plane_mut(&mut self, c: usize) -> &mut [f32] {
        let n = self.plane_len();
        &mut self.data[c * n..(c + 1) * n]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Size of the payload in bytes.
    pub fn byte_size(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Copy out a `width × height` window starting at (`left`, `top`).
    ///
    /// # Panics
    /// Panics if the window does not lie inside the tensor.
    pub fn crop(&self, left: usize, top: usize, width: usize, height: usize) -> Result<Tensor> {
        assert!(
            left + width <= self.width && top + height <= self.height,
            "crop window {width}×{height}+{left}+{top} exceeds {}×{}",
            self.width,
            self.height
        );
        let mut out = Tensor::zeros(self.channels, height, width)?;
        for c in 0..self.channels {
            let src = self.plane(c);
            let dst = out.plane_mut(c);
            for y in 0..height {
                let s = (top + y) * self.width + left;
                dst[y * width..(y + 1) * width].copy_from_slice(&src[s..s + width]);
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor {{ {}×{}×{} }}", self.channels, self.height, self.width)
    }
}

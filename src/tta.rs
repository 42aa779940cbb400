// tta.rs — Test-time augmentation: the eight flip/rotation variants.
//
// Every variant runs the full pipeline on a transformed copy of the input,
// the unrounded output is mapped back with the inverse transform and summed,
// and the mean is rounded once at the end.
//
// Transforms are defined as "mirror first (optional), then rotate
// clockwise". On a W×H image:
//
//   Rot90   (x, y) → (H-1-y, x)        result is H×W
//   Rot180  (x, y) → (W-1-x, H-1-y)
//   Rot270  (x, y) → (y, W-1-x)        result is H×W
//   Mirror  (x, y) → (W-1-x, y)
//
// Rot90 and Rot270 undo each other; every other variant is its own inverse
// (a mirror composed with any rotation is a reflection).

use crate::error::Result;
use crate::image::{Image, ImageView, ImageViewMut, Pixel};
use crate::stages::quantize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Rot90,
    Rot180,
    Rot270,
    Mirror,
    MirrorRot90,
    MirrorRot180,
    MirrorRot270,
}

impl Transform {
    pub const ALL: [Transform; 8] = [
        Transform::Identity,
        Transform::Rot90,
        Transform::Rot180,
        Transform::Rot270,
        Transform::Mirror,
        Transform::MirrorRot90,
        Transform::MirrorRot180,
        Transform::MirrorRot270,
    ];

    pub fn inverse(self) -> Transform {
        match self {
            Transform::Rot90 => Transform::Rot270,
            Transform::Rot270 => Transform::Rot90,
            other => other,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rot90 | Transform::Rot270 | Transform::MirrorRot90 | Transform::MirrorRot270
        )
    }

    fn mirrored(self) -> bool {
        matches!(
            self,
            Transform::Mirror | Transform::MirrorRot90 | Transform::MirrorRot180 | Transform::MirrorRot270
        )
    }

    /// Clockwise quarter turns after the optional mirror.
    fn quarter_turns(self) -> u8 {
        match self {
            Transform::Identity | Transform::Mirror => 0,
            Transform::Rot90 | Transform::MirrorRot90 => 1,
            Transform::Rot180 | Transform::MirrorRot180 => 2,
            Transform::Rot270 | Transform::MirrorRot270 => 3,
        }
    }

    /// Output size for a `w × h` input.
    pub fn output_size(self, w: usize, h: usize) -> (usize, usize) {
        if self.swaps_axes() {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// Source pixel that lands on output pixel (x, y), for a `w × h` source.
    fn source_of(self, x: usize, y: usize, w: usize, h: usize) -> (usize, usize) {
        // Undo the rotation onto the (mirrored) W×H image…
        let (mx, my) = match self.quarter_turns() {
            0 => (x, y),
            1 => (y, h - 1 - x),
            2 => (w - 1 - x, h - 1 - y),
            _ => (w - 1 - y, x),
        };
        // …then undo the mirror.
        if self.mirrored() {
            (w - 1 - mx, my)
        } else {
            (mx, my)
        }
    }

    /// Transformed copy of `src`.
    pub fn apply<T: Pixel>(self, src: &ImageView<T>) -> Image<T> {
        let (w, h) = (src.width(), src.height());
        let (ow, oh) = self.output_size(w, h);
        if self == Transform::Identity {
            return src.to_image();
        }
        let mut out = Image::new(ow, oh, src.channels());
        for y in 0..oh {
            for x in 0..ow {
                let (sx, sy) = self.source_of(x, y, w, h);
                out.pixel_mut(x, y).copy_from_slice(src.pixel(sx, sy));
            }
        }
        out
    }
}

/// Running sum of inverse-transformed TTA outputs.
pub struct TtaAccumulator {
    sum: Image<f32>,
    passes: u32,
}

impl TtaAccumulator {
    /// Accumulator for a `width × height` RGB output.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Ok(TtaAccumulator { sum: Image::try_new(width, height, 3)?, passes: 0 })
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Add one pass's output, produced on input transformed by `transform`.
    pub fn add(&mut self, transform: Transform, output: &Image<f32>) {
        let back = transform.inverse().apply(&output.view());
        debug_assert_eq!((back.width(), back.height()), (self.sum.width(), self.sum.height()));
        for (s, v) in self.sum.as_mut_slice().iter_mut().zip(back.as_slice()) {
            *s += v;
        }
        self.passes += 1;
    }

    /// Write the rounded mean into the RGB channels of `dst`.
    pub fn finish(self, dst: &mut ImageViewMut<u8>) {
        let n = self.passes.max(1) as f32;
        for y in 0..dst.height() {
            for x in 0..dst.width() {
                let px = dst.pixel_mut(x, y);
                for (c, &s) in self.sum.pixel(x, y).iter().enumerate() {
                    px[c] = quantize(s / n);
                }
            }
        }
    }
}

// stages.rs — Pre- and post-processing around the network, CPU versions.
//
// Pre:  padded source rect → edge replication → RGB → /255 → 3×ph×pw tensor
// Post: network output → crop to the tile's interior → (+ nearest-upsampled
//       input for residual models) → ×255 → clamp → write or accumulate
//
// The GPU backend runs the same two stages as WGSL kernels
// (`shaders/preproc.wgsl`, `shaders/postproc.wgsl`) and hands back the same
// `TilePixels`, so everything downstream of a tile is backend-agnostic.

use crate::error::{Result, UpscaleError};
use crate::image::{Image, ImageView, ImageViewMut, Pixel};
use crate::model::Model;
use crate::tensor::Tensor;
use crate::tile::{Rect, TileRegion};

/// Whether the network output stands alone or adds the upsampled input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleClass {
    /// 2x/3x models.
    Direct,
    /// 4x models: output += nearest-upsampled input.
    NearestResidual,
}

impl ScaleClass {
    pub fn of(model: &Model) -> Self {
        if model.residual() {
            ScaleClass::NearestResidual
        } else {
            ScaleClass::Direct
        }
    }
}

/// Where finished tile pixels go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostMode {
    /// Round to u8 and write into the output image.
    Write,
    /// Keep unrounded f32 for averaging (TTA).
    Accumulate,
}

/// Post-stage variant: one of four, selected per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostKind {
    pub class: ScaleClass,
    pub mode: PostMode,
}

/// RGB samples of one finished tile, interleaved, `rect` sized.
#[derive(Debug, Clone, PartialEq)]
pub enum TileData {
    Rounded(Vec<u8>),
    Unrounded(Vec<f32>),
}

/// A finished tile and its place in the output image.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePixels {
    pub rect: Rect,
    pub data: TileData,
}

/// Clamp to [0, 255] and round half up.
#[inline]
pub fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 255.0) + 0.5).floor() as u8
}

// ---------------------------------------------------------------------------
// Pre
// ---------------------------------------------------------------------------

/// Build the network input for one tile: the padded rect, sampled with edge
/// replication, RGB only, normalized to [0, 1].
pub fn preprocess(src: &ImageView<u8>, tile: &TileRegion) -> Result<Tensor> {
    let pw = tile.padded_width();
    let ph = tile.padded_height();
    let (x0, y0) = tile.padded_origin();
    let max_x = src.width() as isize - 1;
    let max_y = src.height() as isize - 1;

    let mut t = Tensor::zeros(3, ph, pw)?;
    for y in 0..ph {
        let sy = (y0 + y as isize).clamp(0, max_y) as usize;
        let row = src.row(sy);
        for x in 0..pw {
            let sx = (x0 + x as isize).clamp(0, max_x) as usize;
            let px = &row[sx * src.channels()..sx * src.channels() + 3];
            for (c, &v) in px.iter().enumerate() {
                t.set(c, y, x, v as f32 / 255.0);
            }
        }
    }
    Ok(t)
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// Offset of the tile interior inside the network output.
///
/// The network trims the same border from every side; that border is read
/// off the actual output size. A border wider than the scaled padding means
/// the prepadding is too small for this model.
pub fn crop_offsets(tile: &TileRegion, scale: usize, out_w: usize, out_h: usize) -> Result<(usize, usize)> {
    let axis = |padded: usize, lead: usize, interior: usize, out: usize| -> Result<usize> {
        let full = padded * scale;
        if out > full {
            return Err(UpscaleError::Config(format!(
                "network output {out} exceeds padded input × scale {full}"
            )));
        }
        let border = (full - out) / 2;
        if border > lead * scale {
            return Err(UpscaleError::Config(format!(
                "model crops {border} output pixels per side, prepadding covers {}",
                lead * scale
            )));
        }
        let off = lead * scale - border;
        if off + interior * scale > out {
            return Err(UpscaleError::Config(format!(
                "tile interior {} at offset {off} overruns network output {out}",
                interior * scale
            )));
        }
        Ok(off)
    };
    Ok((
        axis(tile.padded_width(), tile.padding.left, tile.input.width, out_w)?,
        axis(tile.padded_height(), tile.padding.top, tile.input.height, out_h)?,
    ))
}

/// Turn a network output into finished tile pixels.
///
/// `input` is the tensor `preprocess` produced for the same tile; residual
/// models read it back for the nearest-upsampled skip.
pub fn postprocess(output: &Tensor, input: &Tensor, tile: &TileRegion, scale: usize, kind: PostKind) -> Result<TilePixels> {
    let (off_x, off_y) = crop_offsets(tile, scale, output.width(), output.height())?;
    let rect = tile.output;
    let (tw, th) = (rect.width, rect.height);
    let residual = kind.class == ScaleClass::NearestResidual;

    let value = |c: usize, x: usize, y: usize| -> f32 {
        let mut v = output.get(c, off_y + y, off_x + x);
        if residual {
            v += input.get(c, tile.padding.top + y / scale, tile.padding.left + x / scale);
        }
        (v * 255.0).clamp(0.0, 255.0)
    };

    let len = tw * th * 3;
    let data = match kind.mode {
        PostMode::Write => {
            let mut out = crate::error::try_alloc::<u8>(len, "tile output")?;
            for y in 0..th {
                for x in 0..tw {
                    for c in 0..3 {
                        out[(y * tw + x) * 3 + c] = quantize(value(c, x, y));
                    }
                }
            }
            TileData::Rounded(out)
        }
        PostMode::Accumulate => {
            let mut out = crate::error::try_alloc::<f32>(len, "tile output")?;
            for y in 0..th {
                for x in 0..tw {
                    for c in 0..3 {
                        out[(y * tw + x) * 3 + c] = value(c, x, y);
                    }
                }
            }
            TileData::Unrounded(out)
        }
    };
    Ok(TilePixels { rect, data })
}

// ---------------------------------------------------------------------------
// Output sinks
// ---------------------------------------------------------------------------

/// Destination for finished tiles.
pub enum OutputSink<'a, 'b> {
    /// The caller's u8 output; channels beyond RGB are left alone.
    Write(&'a mut ImageViewMut<'b, u8>),
    /// A 3-channel f32 buffer for averaging.
    Accumulate(&'a mut Image<f32>),
}

impl OutputSink<'_, '_> {
    pub fn mode(&self) -> PostMode {
        match self {
            OutputSink::Write(_) => PostMode::Write,
            OutputSink::Accumulate(_) => PostMode::Accumulate,
        }
    }

    /// Copy one tile into place.
    pub fn store(&mut self, tile: &TilePixels) -> Result<()> {
        let r = tile.rect;
        let (ow, oh) = match self {
            OutputSink::Write(d) => (d.width(), d.height()),
            OutputSink::Accumulate(a) => (a.width(), a.height()),
        };
        if r.right() > ow || r.bottom() > oh {
            return Err(UpscaleError::Input(format!(
                "tile {}×{}+{}+{} outside {ow}×{oh} output",
                r.width, r.height, r.x, r.y
            )));
        }
        for y in 0..r.height {
            for x in 0..r.width {
                let i = (y * r.width + x) * 3;
                match (&mut *self, &tile.data) {
                    (OutputSink::Write(d), TileData::Rounded(v)) => {
                        d.pixel_mut(r.x + x, r.y + y)[..3].copy_from_slice(&v[i..i + 3]);
                    }
                    (OutputSink::Write(d), TileData::Unrounded(v)) => {
                        let px = d.pixel_mut(r.x + x, r.y + y);
                        for c in 0..3 {
                            px[c] = quantize(v[i + c]);
                        }
                    }
                    (OutputSink::Accumulate(a), TileData::Unrounded(v)) => {
                        a.pixel_mut(r.x + x, r.y + y).copy_from_slice(&v[i..i + 3]);
                    }
                    (OutputSink::Accumulate(a), TileData::Rounded(v)) => {
                        let px = a.pixel_mut(r.x + x, r.y + y);
                        for c in 0..3 {
                            px[c] = v[i + c].to_f32();
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alpha
// ---------------------------------------------------------------------------

/// Bilinearly resample the alpha channel (the last one) of `src` to
/// `out_w × out_h`, pixel centres aligned.
pub fn resample_alpha(src: &ImageView<u8>, out_w: usize, out_h: usize) -> Result<Vec<u8>> {
    let (w, h) = (src.width(), src.height());
    let a = src.channels() - 1;
    let sx = w as f32 / out_w as f32;
    let sy = h as f32 / out_h as f32;
    let mut out = crate::error::try_alloc::<u8>(out_w * out_h, "alpha plane")?;

    let coord = |o: usize, step: f32, n: usize| -> (usize, usize, f32) {
        let f = ((o as f32 + 0.5) * step - 0.5).clamp(0.0, (n - 1) as f32);
        let i0 = f.floor() as usize;
        let i1 = (i0 + 1).min(n - 1);
        (i0, i1, f - i0 as f32)
    };

    for oy in 0..out_h {
        let (y0, y1, fy) = coord(oy, sy, h);
        for ox in 0..out_w {
            let (x0, x1, fx) = coord(ox, sx, w);
            let top = src.get(x0, y0, a) as f32 * (1.0 - fx) + src.get(x1, y0, a) as f32 * fx;
            let bot = src.get(x0, y1, a) as f32 * (1.0 - fx) + src.get(x1, y1, a) as f32 * fx;
            out[oy * out_w + ox] = quantize(top * (1.0 - fy) + bot * fy);
        }
    }
    Ok(out)
}

/// Write a resampled alpha plane into the last channel of `dst`.
pub fn write_alpha(dst: &mut ImageViewMut<u8>, alpha: &[u8]) {
    let a = dst.channels() - 1;
    let w = dst.width();
    for y in 0..dst.height() {
        for x in 0..w {
            dst.set(x, y, a, alpha[y * w + x]);
        }
    }
}

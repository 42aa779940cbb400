// network.rs — CPU forward pass for the CUNet operator set.
//
// This is the reference executor. The wgpu executor in `gpu::network`
// mirrors it layer for layer; both share `excite` so the squeeze-excitation
// fully-connected head is evaluated identically on host.
//
// Parallelism: every operator splits its output by channel plane and hands
// the planes to rayon. Each output value is accumulated in a fixed order
// (input channel, then kernel row, then kernel column), so results do not
// depend on how many workers the surrounding pool has.
//
// CHANNEL STATISTICS
// ──────────────────
// `se` layers pool per-channel spatial means. Tiled inference wants to
// replace those per-tile means with image-wide ones, so the forward pass
// takes a `StatsRequest`:
//
//   forced         means to use for stat layers 0..forced.len()
//   collect_until  stop right after recording stat layer i and return the
//                  statistics gathered so far instead of a tensor

use rayon::prelude::*;

use crate::error::{Result, UpscaleError};
use crate::model::{ConvLayer, Model, Op, SeLayer};
use crate::tensor::Tensor;

/// Channel means recorded at one stat layer of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub means: Vec<f32>,
    /// Spatial area the means were taken over; the averaging weight.
    pub weight: f64,
}

/// Statistic overrides and early-exit point for one forward pass.
#[derive(Debug, Clone, Copy)]
pub struct StatsRequest<'a> {
    pub forced: &'a [Vec<f32>],
    pub collect_until: Option<usize>,
}

impl StatsRequest<'static> {
    /// Plain inference: own statistics, full output.
    pub const NONE: StatsRequest<'static> = StatsRequest { forced: &[], collect_until: None };
}

impl<'a> StatsRequest<'a> {
    /// Run with the given statistics substituted.
    pub fn forced(forced: &'a [Vec<f32>]) -> Self {
        StatsRequest { forced, collect_until: None }
    }

    /// Run with `forced` substituted, stop after recording stat layer `layer`.
    pub fn collect(forced: &'a [Vec<f32>], layer: usize) -> Self {
        StatsRequest { forced, collect_until: Some(layer) }
    }
}

/// Result of a forward pass: the output tensor, or the statistics of a
/// pass that stopped early.
#[derive(Debug)]
pub enum ForwardOutput {
    Tensor(Tensor),
    Stats(Vec<ChannelStats>),
}

/// Check a statistics request against the model's stat layers.
pub(crate) fn check_request(model: &Model, req: &StatsRequest) -> Result<()> {
    let n = model.stat_layers();
    if req.forced.len() > n {
        return Err(UpscaleError::Input(format!(
            "{} forced statistic layers, model has {n}",
            req.forced.len()
        )));
    }
    if let Some(layer) = req.collect_until {
        if layer >= n {
            return Err(UpscaleError::Input(format!("stat layer {layer} requested, model has {n}")));
        }
    }
    for (layer, means) in model.nodes.iter().filter_map(|node| match &node.op {
        Op::Se(se) => req.forced.get(se.stat_index).map(|m| (se, m)),
        _ => None,
    }) {
        if means.len() != layer.channels {
            return Err(UpscaleError::Input(format!(
                "forced statistics for stat layer {} have {} channels, expected {}",
                layer.stat_index,
                means.len(),
                layer.channels
            )));
        }
    }
    Ok(())
}

/// Run `model` on `input`.
pub fn forward(model: &Model, input: Tensor, req: &StatsRequest) -> Result<ForwardOutput> {
    model.check_input(&input)?;
    check_request(model, req)?;

    let mut blobs: Vec<Option<Tensor>> = (0..model.blob_count).map(|_| None).collect();
    blobs[model.input_blob] = Some(input);
    let mut stats = Vec::new();

    for (i, node) in model.nodes.iter().enumerate() {
        let out = match &node.op {
            Op::Conv(l) => conv2d(blob(&blobs, node.inputs[0])?, l)?,
            Op::Deconv(l) => deconv2d(blob(&blobs, node.inputs[0])?, l)?,
            Op::Add => add_centered(blob(&blobs, node.inputs[0])?, blob(&blobs, node.inputs[1])?)?,
            Op::Crop(b) => {
                let t = blob(&blobs, node.inputs[0])?;
                t.crop(*b, *b, t.width() - 2 * b, t.height() - 2 * b)?
            }
            Op::Se(se) => {
                let src = node.inputs[0];
                let mut t = if model.last_use[src] == i {
                    blobs[src].take().ok_or_else(|| missing(src))?
                } else {
                    blob(&blobs, src)?.clone()
                };
                let means = match req.forced.get(se.stat_index) {
                    Some(forced) => forced.clone(),
                    None => channel_means(&t),
                };
                stats.push(ChannelStats { means: means.clone(), weight: t.plane_len() as f64 });
                if req.collect_until == Some(se.stat_index) {
                    return Ok(ForwardOutput::Stats(stats));
                }
                scale_channels(&mut t, &excite(se, &means));
                t
            }
        };
        for &b in &node.inputs {
            if model.last_use[b] == i {
                blobs[b] = None;
            }
        }
        blobs[node.output] = Some(out);
    }

    blobs[model.output_blob]
        .take()
        .map(ForwardOutput::Tensor)
        .ok_or_else(|| missing(model.output_blob))
}

fn blob(blobs: &[Option<Tensor>], id: usize) -> Result<&Tensor> {
    blobs[id].as_ref().ok_or_else(|| missing(id))
}

fn missing(id: usize) -> UpscaleError {
    UpscaleError::Resource(format!("activation blob {id} released before use"))
}

#[inline]
fn activate(v: f32, leaky: Option<f32>) -> f32 {
    match leaky {
        Some(slope) if v < 0.0 => v * slope,
        _ => v,
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// k×k convolution with stride and zero padding.
/// Weight layout: `[out][in][k][k]`.
pub(crate) fn conv2d(input: &Tensor, l: &ConvLayer) -> Result<Tensor> {
    let (ic, h, w) = input.shape();
    let (oh, ow) = match (l.conv_extent(h), l.conv_extent(w)) {
        (Some(oh), Some(ow)) => (oh, ow),
        _ => return Err(UpscaleError::Input(format!("{w}×{h} too small for a {}×{0} kernel", l.kernel))),
    };
    let (k, s, p) = (l.kernel, l.stride, l.pad as isize);
    let mut out = Tensor::zeros(l.out_channels, oh, ow)?;

    out.as_mut_slice().par_chunks_mut(oh * ow).enumerate().for_each(|(o, plane)| {
        plane.fill(l.bias[o]);
        for i in 0..ic {
            let src = input.plane(i);
            for ky in 0..k {
                for kx in 0..k {
                    let wv = l.weight[((o * ic + i) * k + ky) * k + kx];
                    for oy in 0..oh {
                        let iy = (oy * s + ky) as isize - p;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        let row = &src[iy as usize * w..(iy as usize + 1) * w];
                        let dst = &mut plane[oy * ow..(oy + 1) * ow];
                        for (ox, d) in dst.iter_mut().enumerate() {
                            let ix = (ox * s + kx) as isize - p;
                            if ix >= 0 && ix < w as isize {
                                *d += wv * row[ix as usize];
                            }
                        }
                    }
                }
            }
        }
        for v in plane.iter_mut() {
            *v = activate(*v, l.leaky);
        }
    });
    Ok(out)
}

/// Transposed convolution. Weight layout: `[in][out][k][k]`.
///
/// Input pixel (iy, ix) contributes to output (iy·s + ky − p, ix·s + kx − p).
pub(crate) fn deconv2d(input: &Tensor, l: &ConvLayer) -> Result<Tensor> {
    let (ic, h, w) = input.shape();
    let (oh, ow) = match (l.deconv_extent(h), l.deconv_extent(w)) {
        (Some(oh), Some(ow)) => (oh, ow),
        _ => return Err(UpscaleError::Input(format!("{w}×{h} collapses under transposed convolution"))),
    };
    let (k, s, p) = (l.kernel, l.stride, l.pad as isize);
    let oc = l.out_channels;
    let mut out = Tensor::zeros(oc, oh, ow)?;

    out.as_mut_slice().par_chunks_mut(oh * ow).enumerate().for_each(|(o, plane)| {
        plane.fill(l.bias[o]);
        for i in 0..ic {
            let src = input.plane(i);
            for ky in 0..k {
                for kx in 0..k {
                    let wv = l.weight[((i * oc + o) * k + ky) * k + kx];
                    for iy in 0..h {
                        let oy = (iy * s + ky) as isize - p;
                        if oy < 0 || oy >= oh as isize {
                            continue;
                        }
                        let row = &src[iy * w..(iy + 1) * w];
                        let base = oy as usize * ow;
                        for (ix, &v) in row.iter().enumerate() {
                            let ox = (ix * s + kx) as isize - p;
                            if ox >= 0 && ox < ow as isize {
                                plane[base + ox as usize] += wv * v;
                            }
                        }
                    }
                }
            }
        }
        for v in plane.iter_mut() {
            *v = activate(*v, l.leaky);
        }
    });
    Ok(out)
}

/// Per-channel spatial mean, accumulated in f64.
pub(crate) fn channel_means(t: &Tensor) -> Vec<f32> {
    let n = t.plane_len() as f64;
    (0..t.channels())
        .into_par_iter()
        .map(|c| (t.plane(c).iter().map(|&v| v as f64).sum::<f64>() / n) as f32)
        .collect()
}

/// Squeeze-excitation head: fc → ReLU → fc → sigmoid. Returns one scale
/// factor per channel.
pub(crate) fn excite(se: &SeLayer, means: &[f32]) -> Vec<f32> {
    let hidden: Vec<f32> = (0..se.hidden)
        .map(|j| {
            let row = &se.fc1_weight[j * se.channels..(j + 1) * se.channels];
            let v = se.fc1_bias[j] + row.iter().zip(means).map(|(w, m)| w * m).sum::<f32>();
            v.max(0.0)
        })
        .collect();
    (0..se.channels)
        .map(|c| {
            let row = &se.fc2_weight[c * se.hidden..(c + 1) * se.hidden];
            let v = se.fc2_bias[c] + row.iter().zip(&hidden).map(|(w, h)| w * h).sum::<f32>();
            1.0 / (1.0 + (-v).exp())
        })
        .collect()
}

pub(crate) fn scale_channels(t: &mut Tensor, scales: &[f32]) {
    let n = t.plane_len();
    t.as_mut_slice()
        .par_chunks_mut(n)
        .zip(scales.par_iter())
        .for_each(|(plane, &s)| plane.iter_mut().for_each(|v| *v *= s));
}

/// Elementwise sum, each operand centre-cropped to the smaller extent.
pub(crate) fn add_centered(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let h = a.height().min(b.height());
    let w = a.width().min(b.width());
    let (ay, ax) = ((a.height() - h) / 2, (a.width() - w) / 2);
    let (by, bx) = ((b.height() - h) / 2, (b.width() - w) / 2);
    let mut out = Tensor::zeros(a.channels(), h, w)?;
    out.as_mut_slice().par_chunks_mut(h * w).enumerate().for_each(|(c, plane)| {
        let pa = a.plane(c);
        let pb = b.plane(c);
        for y in 0..h {
            let ra = &pa[(y + ay) * a.width() + ax..][..w];
            let rb = &pb[(y + by) * b.width() + bx..][..w];
            for ((d, &va), &vb) in plane[y * w..(y + 1) * w].iter_mut().zip(ra).zip(rb) {
                *d = va + vb;
            }
        }
    });
    Ok(out)
}

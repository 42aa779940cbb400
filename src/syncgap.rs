// syncgap.rs — Reconciling per-tile channel statistics.
//
// Squeeze-excitation layers normalize by the spatial mean of their input.
// Run per tile, each tile sees a different mean and the tile boundaries show
// up as seams. Sync-gap replaces the per-tile means with image-wide ones:
//
//   coordination pass   run the network over a coordination image, record
//                       each tile's channel means, average them weighted by
//                       area
//   ── barrier ──        every statistic is final before any output tile runs
//   correction pass     run the real tiles with those means forced
//
// Modes differ only in the coordination image and how many sub-passes build
// the statistics:
//
//   Strong    full resolution, the whole image as one tile, 1 sub-pass
//   Moderate  2× box-downscaled, regular tiles, one sub-pass per stat layer
//             (sub-pass i forces layers < i and stops after layer i)
//   Weak      4× box-downscaled, regular tiles, 1 sub-pass
//
// A coordination pass that cannot be planned within the memory budget falls
// back to the next weaker mode with a warning.

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::config::SyncGap;
use crate::error::{Result, UpscaleError};
use crate::image::{Image, ImageView};
use crate::model::Model;
use crate::network::{ChannelStats, StatsRequest};
use crate::tile::{plan_single, plan_tiles, TileParams, TilePlan};

/// Outcome of the coordination pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordination {
    /// Mode that actually ran after any fallback.
    pub mode: SyncGap,
    /// Agreed means per stat layer; empty when `mode` is `Off`.
    pub stats: Vec<Vec<f32>>,
}

impl Coordination {
    fn off() -> Self {
        Coordination { mode: SyncGap::Off, stats: Vec::new() }
    }
}

/// Run the coordination pass for `src` in `requested` mode.
pub fn coordinate(
    backend: &dyn Backend,
    model: &Model,
    src: &ImageView<u8>,
    requested: SyncGap,
    params: &TileParams,
    budget: u64,
) -> Result<Coordination> {
    let layers = model.stat_layers();
    if layers == 0 || requested == SyncGap::Off {
        debug!(requested = ?requested, layers, "sync-gap off");
        return Ok(Coordination::off());
    }

    let estimate = |w: usize, h: usize| backend.estimate(model, w, h);
    let mut mode = requested;
    while mode != SyncGap::Off {
        let factor = match mode {
            SyncGap::Strong => 1,
            SyncGap::Moderate => 2,
            _ => 4,
        };
        let reduced = (factor > 1).then(|| box_downscale(src, factor));
        let view = reduced.as_ref().map_or(*src, |img| img.view());

        let planned = if mode == SyncGap::Strong {
            plan_single(view.width(), view.height(), params, budget, estimate)
        } else {
            plan_tiles(view.width(), view.height(), params, budget, estimate)
        };
        let plan = match planned {
            Ok(plan) => plan,
            Err(UpscaleError::Config(reason)) => {
                warn!(mode = ?mode, %reason, "sync-gap coordination does not fit, weakening");
                mode = mode.weaker();
                continue;
            }
            Err(e) => return Err(e),
        };

        let stats = run_coordination(backend, model, &view, &plan, mode, layers)?;
        debug!(mode = ?mode, tiles = plan.len(), layers, "sync-gap statistics agreed");
        return Ok(Coordination { mode, stats });
    }
    warn!(requested = ?requested, "no sync-gap coordination fits the budget, running without");
    Ok(Coordination::off())
}

fn run_coordination(
    backend: &dyn Backend,
    model: &Model,
    view: &ImageView<u8>,
    plan: &TilePlan,
    mode: SyncGap,
    layers: usize,
) -> Result<Vec<Vec<f32>>> {
    if mode == SyncGap::Moderate {
        let mut agreed: Vec<Vec<f32>> = Vec::with_capacity(layers);
        for layer in 0..layers {
            let per_tile = backend.collect_stats(model, view, plan, &StatsRequest::collect(&agreed, layer))?;
            agreed.push(weighted_mean(&per_tile, layer)?);
        }
        Ok(agreed)
    } else {
        let per_tile = backend.collect_stats(model, view, plan, &StatsRequest::collect(&[], layers - 1))?;
        (0..layers).map(|layer| weighted_mean(&per_tile, layer)).collect()
    }
}

/// Area-weighted mean of one stat layer across tiles.
pub fn weighted_mean(per_tile: &[Vec<ChannelStats>], layer: usize) -> Result<Vec<f32>> {
    let mut acc: Vec<f64> = Vec::new();
    let mut total = 0.0f64;
    for stats in per_tile {
        let s = stats.get(layer).ok_or_else(|| {
            UpscaleError::Resource(format!("tile reported no statistics for layer {layer}"))
        })?;
        if acc.is_empty() {
            acc = vec![0.0; s.means.len()];
        }
        for (a, &m) in acc.iter_mut().zip(&s.means) {
            *a += m as f64 * s.weight;
        }
        total += s.weight;
    }
    if total <= 0.0 {
        return Err(UpscaleError::Resource(format!("no area behind statistics of layer {layer}")));
    }
    Ok(acc.into_iter().map(|a| (a / total) as f32).collect())
}

/// RGB box downscale by an integer factor; edge blocks average only the
/// pixels that exist.
pub fn box_downscale(src: &ImageView<u8>, factor: usize) -> Image<u8> {
    let w = src.width().div_ceil(factor);
    let h = src.height().div_ceil(factor);
    let mut out = Image::new(w, h, 3);
    for oy in 0..h {
        let ys = oy * factor..((oy + 1) * factor).min(src.height());
        for ox in 0..w {
            let xs = ox * factor..((ox + 1) * factor).min(src.width());
            let mut sum = [0u32; 3];
            let n = (ys.len() * xs.len()) as u32;
            for y in ys.clone() {
                for x in xs.clone() {
                    for (c, s) in sum.iter_mut().enumerate() {
                        *s += src.get(x, y, c) as u32;
                    }
                }
            }
            for (c, s) in sum.iter().enumerate() {
                out.set(ox, oy, c, ((s + n / 2) / n) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(means: &[f32], weight: f64) -> ChannelStats {
        ChannelStats { means: means.to_vec(), weight }
    }

    #[test]
    fn test_weighted_mean_by_area() {
        let per_tile = vec![vec![stats(&[1.0, 0.0], 3.0)], vec![stats(&[5.0, 4.0], 1.0)]];
        assert_eq!(weighted_mean(&per_tile, 0).unwrap(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_weighted_mean_single_tile_is_exact() {
        let m = [0.123_456_7f32, 9.876_543];
        let per_tile = vec![vec![stats(&m, 777.0)]];
        assert_eq!(weighted_mean(&per_tile, 0).unwrap(), m.to_vec());
    }

    #[test]
    fn test_weighted_mean_missing_layer() {
        let per_tile = vec![vec![stats(&[1.0], 1.0)]];
        assert!(weighted_mean(&per_tile, 1).is_err());
    }

    #[test]
    fn test_box_downscale_partial_blocks() {
        // 3×1 RGBA → factor 2 → 2×1: block 0 averages two pixels, block 1 one.
        let data = [0, 0, 0, 255, 100, 100, 100, 255, 7, 8, 9, 255];
        let src = ImageView::new(&data, 3, 1, 4).unwrap();
        let out = box_downscale(&src, 2);
        assert_eq!((out.width(), out.height(), out.channels()), (2, 1, 3));
        assert_eq!(out.pixel(0, 0), &[50, 50, 50]);
        assert_eq!(out.pixel(1, 0), &[7, 8, 9]);
    }
}

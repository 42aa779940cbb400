// backend.rs — Compute backends: the seam between orchestration and
// execution.
//
// The upscaler, sync-gap reconciler and TTA orchestrator only ever talk to
// `dyn Backend`. A backend runs pre → network → post for a list of tiles and
// either stores finished pixels into an `OutputSink` or returns per-tile
// channel statistics.
//
//   CpuBackend  rayon pool, tiles in parallel batches
//   GpuBackend  wgpu, tiles strictly sequential (see gpu/backend.rs)

use rayon::prelude::*;
use tracing::trace;

use crate::error::{Result, UpscaleError};
use crate::image::ImageView;
use crate::model::Model;
use crate::network::{self, ChannelStats, ForwardOutput, StatsRequest};
use crate::stages::{self, OutputSink, PostKind, ScaleClass, TilePixels};
use crate::tile::{TilePlan, TileRegion};

/// Executes tiles of one image on a device.
pub trait Backend: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Peak bytes one `width × height` padded tile needs on this backend.
    fn estimate(&self, model: &Model, width: usize, height: usize) -> Result<u64> {
        model.peak_activation_bytes(width, height)
    }

    /// Run every tile of `plan` with the given forced statistics and store
    /// the results in `sink`.
    fn run_tiles(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        plan: &TilePlan,
        forced: &[Vec<f32>],
        sink: &mut OutputSink<'_, '_>,
    ) -> Result<()>;

    /// Run every tile of `plan` up to `req.collect_until` and return each
    /// tile's statistics, in plan order.
    fn collect_stats(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        plan: &TilePlan,
        req: &StatsRequest,
    ) -> Result<Vec<Vec<ChannelStats>>>;
}

// ---------------------------------------------------------------------------
// CPU
// ---------------------------------------------------------------------------

/// Reference backend on a dedicated rayon pool.
pub struct CpuBackend {
    pool: rayon::ThreadPool,
}

impl CpuBackend {
    /// `threads` = 0 lets rayon pick one worker per core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("supertile-cpu-{i}"))
            .build()
            .map_err(|e| UpscaleError::Resource(format!("cannot start CPU worker pool: {e}")))?;
        Ok(CpuBackend { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn run_tile(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        tile: &TileRegion,
        forced: &[Vec<f32>],
        kind: PostKind,
    ) -> Result<TilePixels> {
        trace!(tile = tile.index, x = tile.input.x, y = tile.input.y, "cpu tile");
        let input = stages::preprocess(src, tile)?;
        let output = match network::forward(model, input.clone(), &StatsRequest::forced(forced))? {
            ForwardOutput::Tensor(t) => t,
            ForwardOutput::Stats(_) => return Err(early_exit()),
        };
        stages::postprocess(&output, &input, tile, model.scale() as usize, kind)
    }
}

fn early_exit() -> UpscaleError {
    UpscaleError::Resource("forward pass returned statistics where a tensor was expected".into())
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn run_tiles(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        plan: &TilePlan,
        forced: &[Vec<f32>],
        sink: &mut OutputSink<'_, '_>,
    ) -> Result<()> {
        let kind = PostKind { class: ScaleClass::of(model), mode: sink.mode() };
        // Batches of one tile per worker bound the finished-but-unstored
        // pixels to `threads` tiles.
        let batch = self.threads().max(1);
        for chunk in plan.tiles.chunks(batch) {
            let done: Vec<TilePixels> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .map(|tile| self.run_tile(model, src, tile, forced, kind))
                    .collect::<Result<Vec<_>>>()
            })?;
            for pixels in &done {
                sink.store(pixels)?;
            }
        }
        Ok(())
    }

    fn collect_stats(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        plan: &TilePlan,
        req: &StatsRequest,
    ) -> Result<Vec<Vec<ChannelStats>>> {
        self.pool.install(|| {
            plan.tiles
                .par_iter()
                .map(|tile| {
                    trace!(tile = tile.index, "cpu stats tile");
                    let input = stages::preprocess(src, tile)?;
                    match network::forward(model, input, req)? {
                        ForwardOutput::Stats(stats) => Ok(stats),
                        ForwardOutput::Tensor(_) => Err(UpscaleError::Resource(
                            "statistics pass ran to completion without stopping".into(),
                        )),
                    }
                })
                .collect()
        })
    }
}

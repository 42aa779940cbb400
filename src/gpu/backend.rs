// gpu/backend.rs — `Backend` implementation on wgpu.
//
// Tiles run strictly one after another: a tile's activations are the bulk of
// device memory use, and the planner sized tiles so that exactly one set fits
// the budget. Each tile is one error scope; an out-of-memory or validation
// error raised anywhere inside it surfaces as `UpscaleError::Resource`
// instead of wgpu's default uncaptured-error panic.

use std::sync::Arc;

use tracing::{info, trace};

use crate::backend::Backend;
use crate::error::{Result, UpscaleError};
use crate::gpu::buffers::GpuTensor;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::kernels::{Kernels, Recorder};
use crate::gpu::network::{GpuForward, GpuNetwork};
use crate::gpu::stages;
use crate::image::ImageView;
use crate::model::Model;
use crate::network::{ChannelStats, StatsRequest};
use crate::stages::{OutputSink, PostKind, ScaleClass, TilePixels};
use crate::tile::{TilePlan, TileRegion};

pub struct GpuBackend {
    gpu: Arc<GpuDevice>,
    kernels: Kernels,
    network: GpuNetwork,
}

impl GpuBackend {
    /// Compile every kernel and upload `model`'s weights.
    pub fn new(gpu: Arc<GpuDevice>, model: &Model) -> Result<Self> {
        let (kernels, network) = scoped(&gpu, || Ok((Kernels::new(&gpu), GpuNetwork::upload(&gpu, model))))?;
        info!(
            adapter = %gpu.adapter_info,
            model = model.name(),
            weight_bytes = network.weight_bytes(),
            "GPU backend ready"
        );
        Ok(GpuBackend { gpu, kernels, network })
    }

    fn run_tile(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        tile: &TileRegion,
        forced: &[Vec<f32>],
        kind: PostKind,
    ) -> Result<TilePixels> {
        trace!(tile = tile.index, x = tile.input.x, y = tile.input.y, "gpu tile");
        let gpu = &*self.gpu;
        scoped(gpu, || {
            let mut rec = Recorder::new(gpu);
            let input = stages::preprocess(gpu, &self.kernels, &mut rec, src, tile)?;
            // The network consumes its input blob; residual models read the
            // input again in the post stage, so they get a device-side copy.
            let net_input = duplicate(gpu, &mut rec, &input);
            let output = match self.network.forward(gpu, &self.kernels, model, &mut rec, net_input, &StatsRequest::forced(forced))? {
                GpuForward::Tensor(t) => t,
                GpuForward::Stats(_) => {
                    return Err(UpscaleError::Resource(
                        "forward pass returned statistics where a tensor was expected".into(),
                    ))
                }
            };
            stages::postprocess(gpu, &self.kernels, &mut rec, &output, &input, tile, model.scale() as usize, kind)
        })
    }

    fn stats_tile(
        &self,
        model: &Model,
        src: &ImageView<u8>,
        tile: &TileRegion,
        req: &StatsRequest,
    ) -> Result<Vec<ChannelStats>> {
        trace!(tile = tile.index, "gpu stats tile");
        let gpu = &*self.gpu;
        scoped(gpu, || {
            let mut rec = Recorder::new(gpu);
            let input = stages::preprocess(gpu, &self.kernels, &mut rec, src, tile)?;
            match self.network.forward(gpu, &self.kernels, model, &mut rec, input, req)? {
                GpuForward::Stats(stats) => Ok(stats),
                GpuForward::Tensor(_) => Err(UpscaleError::Resource(
                    "statistics pass ran to completion without stopping".into(),
                )),
            }
        })
    }
}

impl Backend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn estimate(&self, model: &Model, width: usize, height: usize) -> Result<u64> {
        device_working_set(model, width, height)
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
        for tile in &plan.tiles {
            let pixels = self.run_tile(model, src, tile, forced, kind)?;
            sink.store(&pixels)?;
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
        plan.tiles.iter().map(|tile| self.stats_tile(model, src, tile, req)).collect()
    }
}

/// Device bytes one `width × height` padded tile holds at its peak: the
/// network's activations as the recorder releases them, plus the packed
/// source upload, the input kept for post-processing, and the post output
/// with its readback staging copy (bounded by the network output).
pub(crate) fn device_working_set(model: &Model, width: usize, height: usize) -> Result<u64> {
    let activations = model.deferred_peak_bytes(width, height)?;
    let (ow, oh) = model.output_size(width, height)?;
    let source = (width * height * 4) as u64;
    let kept_input = (3 * width * height * 4) as u64;
    let post = (3 * ow * oh * 4) as u64;
    Ok(activations + source + kept_input + 2 * post)
}

fn duplicate(gpu: &GpuDevice, rec: &mut Recorder<'_>, t: &GpuTensor) -> GpuTensor {
    let copy = GpuTensor::empty(gpu, "network input", t.channels, t.height, t.width);
    rec.encoder().copy_buffer_to_buffer(&t.buffer, 0, &copy.buffer, 0, (t.elements() * 4) as u64);
    copy
}

/// Run `f` inside out-of-memory and validation error scopes.
fn scoped<T>(gpu: &GpuDevice, f: impl FnOnce() -> Result<T>) -> Result<T> {
    gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    let validation = pollster::block_on(gpu.device.pop_error_scope());
    let oom = pollster::block_on(gpu.device.pop_error_scope());
    if let Some(e) = oom {
        return Err(GpuError::OutOfMemory(e.to_string()).into());
    }
    if let Some(e) = validation {
        return Err(GpuError::Validation(e.to_string()).into());
    }
    result
}

// ============================================================
// Tests
// ============================================================

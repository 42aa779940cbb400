// gpu/network.rs — Layer-by-layer forward pass on wgpu.
//
// Mirrors `network::forward`: same blob liveness, same statistics request
// semantics, same operators. Weights are uploaded once per model; activations
// are fresh storage buffers per tile and drop as soon as their last reader
// has been recorded.
//
// SQUEEZE-EXCITATION
// ──────────────────
// The mean reduction runs on the GPU (channel_mean.wgsl). The tiny fc head
// does not: the means are read back, `network::excite` evaluates the head on
// host exactly as the CPU path does, and the per-channel scales go back up
// for scale_channels.wgsl. When the means are forced, no readback happens,
// but the recorder still syncs there so device memory is reclaimed at every
// SE layer either way.
//
//   … conv ─▶ channel_mean ─▶ flush + readback ─▶ excite (host)
//                                                    │
//        scale_channels ◀── upload scales ◀──────────┘ ─▶ conv …

use tracing::trace;

use crate::error::{Result, UpscaleError};
use crate::gpu::buffers::{bytes_to_f32, read_back, storage_buffer, uniform, upload_f32, GpuTensor};
use crate::gpu::device::GpuDevice;
use crate::gpu::kernels::{AddParams, ConvParams, CropParams, Kernel, Kernels, PlaneParams, Recorder};
use crate::model::{ConvLayer, Model, Op};
use crate::network::{self, ChannelStats, StatsRequest};

/// Result of a GPU forward pass.
pub enum GpuForward {
    Tensor(GpuTensor),
    Stats(Vec<ChannelStats>),
}

struct LayerWeights {
    weight: wgpu::Buffer,
    bias: wgpu::Buffer,
}

/// A model's weights resident on one device.
pub struct GpuNetwork {
    /// Indexed like `model.nodes`; `None` for weightless ops.
    weights: Vec<Option<LayerWeights>>,
    bytes: u64,
}

impl GpuNetwork {
    pub fn upload(gpu: &GpuDevice, model: &Model) -> Self {
        let mut bytes = 0u64;
        let weights = model
            .nodes
            .iter()
            .map(|node| match &node.op {
                Op::Conv(l) | Op::Deconv(l) => {
                    bytes += ((l.weight.len() + l.bias.len()) * 4) as u64;
                    Some(LayerWeights {
                        weight: upload_f32(gpu, &node.name, &l.weight),
                        bias: upload_f32(gpu, &node.name, &l.bias),
                    })
                }
                _ => None,
            })
            .collect();
        GpuNetwork { weights, bytes }
    }

    /// Device bytes held by the weights.
    pub fn weight_bytes(&self) -> u64 {
        self.bytes
    }

    /// Run `model` on `input`, recording into `rec`.
    pub fn forward(
        &self,
        gpu: &GpuDevice,
        kernels: &Kernels,
        model: &Model,
        rec: &mut Recorder<'_>,
        input: GpuTensor,
        req: &StatsRequest,
    ) -> Result<GpuForward> {
        network::check_request(model, req)?;
        if input.channels != model.in_channels()
            || input.width % model.alignment() != 0
            || input.height % model.alignment() != 0
        {
            return Err(UpscaleError::Input(format!(
                "tensor {}×{}×{} does not fit the model input",
                input.channels, input.width, input.height
            )));
        }
        let shapes = model.shapes(input.width, input.height)?;

        let mut blobs: Vec<Option<GpuTensor>> = (0..model.blob_count).map(|_| None).collect();
        blobs[model.input_blob] = Some(input);
        let mut stats = Vec::new();

        for (i, node) in model.nodes.iter().enumerate() {
            let (c, h, w) = shapes[node.output];
            let out = match &node.op {
                Op::Conv(l) | Op::Deconv(l) => {
                    let src = blob(&blobs, node.inputs[0])?;
                    let weights = self.weights[i]
                        .as_ref()
                        .ok_or_else(|| UpscaleError::Resource(format!("no weights on device for `{}`", node.name)))?;
                    let out = GpuTensor::empty(gpu, &node.name, c, h, w);
                    let params = uniform(gpu, "conv params", &conv_params(l, src, &out));
                    let kernel = if matches!(node.op, Op::Conv(_)) { &kernels.conv2d } else { &kernels.deconv2d };
                    kernel.record(
                        gpu,
                        rec.encoder(),
                        &[&params, &src.buffer, &weights.weight, &weights.bias, &out.buffer],
                        Kernel::grid(gpu, w, h, c),
                    );
                    out
                }
                Op::Add => {
                    let a = blob(&blobs, node.inputs[0])?;
                    let b = blob(&blobs, node.inputs[1])?;
                    let out = GpuTensor::empty(gpu, &node.name, c, h, w);
                    let params = AddParams {
                        channels: c as u32,
                        h: h as u32,
                        w: w as u32,
                        a_h: a.height as u32,
                        a_w: a.width as u32,
                        a_y: ((a.height - h) / 2) as u32,
                        a_x: ((a.width - w) / 2) as u32,
                        b_h: b.height as u32,
                        b_w: b.width as u32,
                        b_y: ((b.height - h) / 2) as u32,
                        b_x: ((b.width - w) / 2) as u32,
                        _pad: 0,
                    };
                    let params = uniform(gpu, "add params", &params);
                    kernels.add_crop.record(
                        gpu,
                        rec.encoder(),
                        &[&params, &a.buffer, &b.buffer, &out.buffer],
                        Kernel::grid(gpu, w, h, c),
                    );
                    out
                }
                Op::Crop(border) => {
                    let src = blob(&blobs, node.inputs[0])?;
                    let out = GpuTensor::empty(gpu, &node.name, c, h, w);
                    let params = CropParams {
                        channels: c as u32,
                        h: h as u32,
                        w: w as u32,
                        src_h: src.height as u32,
                        src_w: src.width as u32,
                        border: *border as u32,
                        _pad: [0; 2],
                    };
                    let params = uniform(gpu, "crop params", &params);
                    kernels.crop.record(gpu, rec.encoder(), &[&params, &src.buffer, &out.buffer], Kernel::grid(gpu, w, h, c));
                    out
                }
                Op::Se(se) => {
                    let src = node.inputs[0];
                    let t = if model.last_use[src] == i {
                        blobs[src].take().ok_or_else(|| missing(src))?
                    } else {
                        let from = blob(&blobs, src)?;
                        let copy = GpuTensor::empty(gpu, &node.name, c, h, w);
                        rec.encoder().copy_buffer_to_buffer(&from.buffer, 0, &copy.buffer, 0, (from.elements() * 4) as u64);
                        copy
                    };
                    let plane = PlaneParams { channels: c as u32, height: h as u32, width: w as u32, _pad: 0 };
                    let params = uniform(gpu, "plane params", &plane);

                    let means = match req.forced.get(se.stat_index) {
                        Some(forced) => {
                            rec.sync();
                            forced.clone()
                        }
                        None => {
                            let means = storage_buffer(gpu, "channel means", (c * 4) as u64);
                            kernels.channel_mean.record(gpu, rec.encoder(), &[&params, &t.buffer, &means], (c as u32, 1, 1));
                            rec.flush();
                            bytes_to_f32(&read_back(gpu, &means, (c * 4) as u64)?)
                        }
                    };
                    trace!(layer = %node.name, stat = se.stat_index, "gpu channel statistics");
                    stats.push(ChannelStats { means: means.clone(), weight: (h * w) as f64 });
                    if req.collect_until == Some(se.stat_index) {
                        return Ok(GpuForward::Stats(stats));
                    }

                    let scales = upload_f32(gpu, "excitation", &network::excite(se, &means));
                    kernels.scale_channels.record(
                        gpu,
                        rec.encoder(),
                        &[&params, &scales, &t.buffer],
                        Kernel::grid(gpu, w, h, c),
                    );
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
            .map(GpuForward::Tensor)
            .ok_or_else(|| missing(model.output_blob))
    }
}

fn conv_params(l: &ConvLayer, src: &GpuTensor, out: &GpuTensor) -> ConvParams {
    ConvParams {
        in_c: l.in_channels as u32,
        in_h: src.height as u32,
        in_w: src.width as u32,
        out_c: l.out_channels as u32,
        out_h: out.height as u32,
        out_w: out.width as u32,
        kernel: l.kernel as u32,
        stride: l.stride as u32,
        pad: l.pad as u32,
        leaky: l.leaky.is_some() as u32,
        slope: l.leaky.unwrap_or(0.0),
        _pad: 0,
    }
}

fn blob(blobs: &[Option<GpuTensor>], id: usize) -> Result<&GpuTensor> {
    blobs[id].as_ref().ok_or_else(|| missing(id))
}

fn missing(id: usize) -> UpscaleError {
    UpscaleError::Resource(format!("device blob {id} released before use"))
}

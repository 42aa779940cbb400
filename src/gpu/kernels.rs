// gpu/kernels.rs — Compiled compute pipelines for the network and stages.
//
// Every kernel binds a uniform params struct at binding 0 followed by plain
// storage buffers, so a single `Kernel` type covers all of them: it owns the
// pipeline and its bind group layout, and `record()` builds a bind group from
// the buffers in binding order and dispatches it in its own compute pass.
//
//   kernel           shader               grid (x, y, z)
//   ──────────────   ──────────────────   ─────────────────────────────
//   preproc          preproc.wgsl         padded w, padded h, 1
//   conv2d           conv2d.wgsl          out w, out h, out channels
//   deconv2d         deconv2d.wgsl        out w, out h, out channels
//   channel_mean     channel_mean.wgsl    one 256-wide group per channel
//   scale_channels   scale_channels.wgsl  w, h, channels
//   add_crop         add_crop.wgsl        w, h, channels
//   crop             crop.wgsl            w, h, channels
//   post_write       postproc.wgsl        tile out w, tile out h, 1
//   post_accumulate  postproc.wgsl        tile out w, tile out h, 1
//
// Workgroup sizes are baked into the WGSL source through the {{WG_X}} and
// {{WG_Y}} placeholders; naga does not accept override constants inside
// @workgroup_size().

use crate::gpu::device::{dispatch_for, GpuDevice};

/// How a kernel sees one of its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Uniform,
    ReadOnly,
    ReadWrite,
}

impl Binding {
    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Binding::Uniform => wgpu::BufferBindingType::Uniform,
            Binding::ReadOnly => wgpu::BufferBindingType::Storage { read_only: true },
            Binding::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer { ty, has_dynamic_offset: false, min_binding_size: None },
            count: None,
        }
    }
}

/// One compute entry point with its bind group layout.
pub struct Kernel {
    name: &'static str,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    arity: usize,
}

impl Kernel {
    fn new(gpu: &GpuDevice, module: &wgpu::ShaderModule, entry_point: &'static str, bindings: &[Binding]) -> Self {
        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            bindings.iter().enumerate().map(|(i, b)| b.layout_entry(i as u32)).collect();
        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(entry_point),
            entries: &entries,
        });
        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(entry_point),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&layout),
            module,
            entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        Kernel { name: entry_point, pipeline, bgl, arity: bindings.len() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record one dispatch of `groups` workgroups. `buffers` are bound in
    /// order starting at binding 0.
    pub fn record(&self, gpu: &GpuDevice, encoder: &mut wgpu::CommandEncoder, buffers: &[&wgpu::Buffer], groups: (u32, u32, u32)) {
        debug_assert_eq!(buffers.len(), self.arity, "{}: wrong number of buffers", self.name);
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry { binding: i as u32, resource: b.as_entire_binding() })
            .collect();
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.name),
            layout: &self.bgl,
            entries: &entries,
        });
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.name),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups.0, groups.1, groups.2);
    }

    /// Workgroup grid covering a `w × h` image across `depth` planes.
    pub fn grid(gpu: &GpuDevice, w: usize, h: usize, depth: usize) -> (u32, u32, u32) {
        let (gx, gy) = dispatch_for(gpu.workgroup_size, w as u32, h as u32);
        (gx, gy, depth as u32)
    }
}

/// Lazily opened command encoder. Kernels are recorded back to back and only
/// submitted at statistics layers and when the host needs a result, so a
/// tile costs a few submissions rather than one per layer. Device memory of
/// dropped buffers comes back only at those points, which is what
/// `Model::deferred_peak_bytes` accounts for.
pub struct Recorder<'g> {
    gpu: &'g GpuDevice,
    encoder: Option<wgpu::CommandEncoder>,
}

impl<'g> Recorder<'g> {
    pub fn new(gpu: &'g GpuDevice) -> Self {
        Recorder { gpu, encoder: None }
    }

    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let gpu = self.gpu;
        self.encoder.get_or_insert_with(|| {
            gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("tile") })
        })
    }

    /// Submit everything recorded so far.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    /// Submit and wait, so buffers dropped since the last sync are
    /// reclaimed before more are allocated.
    pub fn sync(&mut self) {
        self.flush();
        self.gpu.device.poll(wgpu::Maintain::Wait);
    }
}

/// Every pipeline the GPU backend dispatches, compiled once per backend.
pub struct Kernels {
    pub preproc: Kernel,
    pub conv2d: Kernel,
    pub deconv2d: Kernel,
    pub channel_mean: Kernel,
    pub scale_channels: Kernel,
    pub add_crop: Kernel,
    pub crop: Kernel,
    pub post_write: Kernel,
    pub post_accumulate: Kernel,
}

impl Kernels {
    pub fn new(gpu: &GpuDevice) -> Self {
        use Binding::{ReadOnly as R, ReadWrite as W, Uniform as U};

        let module = |label: &str, template: &str| {
            let src = template
                .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
                .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());
            gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            })
        };

        let preproc = module("preproc.wgsl", include_str!("../shaders/preproc.wgsl"));
        let conv = module("conv2d.wgsl", include_str!("../shaders/conv2d.wgsl"));
        let deconv = module("deconv2d.wgsl", include_str!("../shaders/deconv2d.wgsl"));
        let mean = module("channel_mean.wgsl", include_str!("../shaders/channel_mean.wgsl"));
        let scale = module("scale_channels.wgsl", include_str!("../shaders/scale_channels.wgsl"));
        let add = module("add_crop.wgsl", include_str!("../shaders/add_crop.wgsl"));
        let crop = module("crop.wgsl", include_str!("../shaders/crop.wgsl"));
        let post = module("postproc.wgsl", include_str!("../shaders/postproc.wgsl"));

        Kernels {
            preproc: Kernel::new(gpu, &preproc, "preproc", &[U, R, W]),
            conv2d: Kernel::new(gpu, &conv, "conv2d", &[U, R, R, R, W]),
            deconv2d: Kernel::new(gpu, &deconv, "deconv2d", &[U, R, R, R, W]),
            channel_mean: Kernel::new(gpu, &mean, "channel_mean", &[U, R, W]),
            scale_channels: Kernel::new(gpu, &scale, "scale_channels", &[U, R, W]),
            add_crop: Kernel::new(gpu, &add, "add_crop", &[U, R, R, W]),
            crop: Kernel::new(gpu, &crop, "crop", &[U, R, W]),
            post_write: Kernel::new(gpu, &post, "post_write", &[U, R, R, W]),
            post_accumulate: Kernel::new(gpu, &post, "post_accumulate", &[U, R, R, W]),
        }
    }
}

// ---------------------------------------------------------------------------
// Params uniforms (must match the WGSL structs field for field)
// ---------------------------------------------------------------------------

/// `Params` in preproc.wgsl. The source is the clipped padded rect, packed
/// four bytes per word; `offset` is the padded origin relative to it.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PreprocParams {
    pub src_w: u32,
    pub src_h: u32,
    pub channels: u32,
    pub dst_w: u32,
    pub dst_h: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub _pad: u32,
}

/// `Params` in conv2d.wgsl and deconv2d.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvParams {
    pub in_c: u32,
    pub in_h: u32,
    pub in_w: u32,
    pub out_c: u32,
    pub out_h: u32,
    pub out_w: u32,
    pub kernel: u32,
    pub stride: u32,
    pub pad: u32,
    /// 0 = linear, 1 = leaky ReLU with `slope`.
    pub leaky: u32,
    pub slope: f32,
    pub _pad: u32,
}

/// `Params` in channel_mean.wgsl, scale_channels.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PlaneParams {
    pub channels: u32,
    pub height: u32,
    pub width: u32,
    pub _pad: u32,
}

/// `Params` in add_crop.wgsl: both operands centre-cropped to `h × w`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AddParams {
    pub channels: u32,
    pub h: u32,
    pub w: u32,
    pub a_h: u32,
    pub a_w: u32,
    pub a_y: u32,
    pub a_x: u32,
    pub b_h: u32,
    pub b_w: u32,
    pub b_y: u32,
    pub b_x: u32,
    pub _pad: u32,
}

/// `Params` in crop.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CropParams {
    pub channels: u32,
    pub h: u32,
    pub w: u32,
    pub src_h: u32,
    pub src_w: u32,
    pub border: u32,
    pub _pad: [u32; 2],
}

/// `Params` in postproc.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostParams {
    pub out_w: u32,
    pub out_h: u32,
    pub in_w: u32,
    pub in_h: u32,
    pub dst_w: u32,
    pub dst_h: u32,
    pub off_x: u32,
    pub off_y: u32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub scale: u32,
    /// 1 adds the nearest-upsampled input.
    pub residual: u32,
}

// gpu/stages.rs — Pre- and post-processing on the GPU.
//
// Same contract as `stages::preprocess` / `stages::postprocess`, but the
// tensors never leave the device between the two:
//
//   upload clipped rect ─▶ preproc ─▶ [network] ─▶ post_* ─▶ readback tile
//
// Only the part of the source the padded rect actually covers is uploaded;
// the kernel replicates the edge for the part hanging off the image.

use crate::error::{try_alloc, Result};
use crate::gpu::buffers::{bytes_to_f32, pack_bytes, read_back, storage_buffer, uniform, upload_u32, GpuTensor};
use crate::gpu::device::GpuDevice;
use crate::gpu::kernels::{Kernel, Kernels, PostParams, PreprocParams, Recorder};
use crate::image::ImageView;
use crate::stages::{crop_offsets, PostKind, PostMode, ScaleClass, TileData, TilePixels};
use crate::tile::TileRegion;

/// Upload one tile's source pixels and record the preproc kernel.
pub fn preprocess(
    gpu: &GpuDevice,
    kernels: &Kernels,
    rec: &mut Recorder<'_>,
    src: &ImageView<u8>,
    tile: &TileRegion,
) -> Result<GpuTensor> {
    let (pw, ph) = (tile.padded_width(), tile.padded_height());
    let (x0, y0) = tile.padded_origin();
    let cx0 = x0.max(0) as usize;
    let cy0 = y0.max(0) as usize;
    let cx1 = ((x0 + pw as isize) as usize).min(src.width());
    let cy1 = ((y0 + ph as isize) as usize).min(src.height());
    let ch = src.channels();

    let mut bytes = try_alloc::<u8>((cx1 - cx0) * (cy1 - cy0) * ch, "tile upload")?;
    let row_len = (cx1 - cx0) * ch;
    for (i, y) in (cy0..cy1).enumerate() {
        bytes[i * row_len..(i + 1) * row_len].copy_from_slice(&src.row(y)[cx0 * ch..cx1 * ch]);
    }
    let packed = upload_u32(gpu, "tile source", &pack_bytes(&bytes));

    let params = PreprocParams {
        src_w: (cx1 - cx0) as u32,
        src_h: (cy1 - cy0) as u32,
        channels: ch as u32,
        dst_w: pw as u32,
        dst_h: ph as u32,
        offset_x: (x0 - cx0 as isize) as i32,
        offset_y: (y0 - cy0 as isize) as i32,
        _pad: 0,
    };
    let params = uniform(gpu, "preproc params", &params);
    let out = GpuTensor::empty(gpu, "tile input", 3, ph, pw);
    kernels.preproc.record(gpu, rec.encoder(), &[&params, &packed, &out.buffer], Kernel::grid(gpu, pw, ph, 1));
    Ok(out)
}

/// Record the post kernel for `kind`, submit, and read the tile back.
#[allow(clippy::too_many_arguments)]
pub fn postprocess(
    gpu: &GpuDevice,
    kernels: &Kernels,
    rec: &mut Recorder<'_>,
    output: &GpuTensor,
    input: &GpuTensor,
    tile: &TileRegion,
    scale: usize,
    kind: PostKind,
) -> Result<TilePixels> {
    let (off_x, off_y) = crop_offsets(tile, scale, output.width, output.height)?;
    let rect = tile.output;
    let (tw, th) = (rect.width, rect.height);

    let params = PostParams {
        out_w: output.width as u32,
        out_h: output.height as u32,
        in_w: input.width as u32,
        in_h: input.height as u32,
        dst_w: tw as u32,
        dst_h: th as u32,
        off_x: off_x as u32,
        off_y: off_y as u32,
        pad_x: tile.padding.left as u32,
        pad_y: tile.padding.top as u32,
        scale: scale as u32,
        residual: (kind.class == ScaleClass::NearestResidual) as u32,
    };
    let params = uniform(gpu, "post params", &params);

    let (kernel, words) = match kind.mode {
        PostMode::Write => (&kernels.post_write, tw * th),
        PostMode::Accumulate => (&kernels.post_accumulate, tw * th * 3),
    };
    let dst = storage_buffer(gpu, "tile output", (words * 4) as u64);
    kernel.record(
        gpu,
        rec.encoder(),
        &[&params, &output.buffer, &input.buffer, &dst],
        Kernel::grid(gpu, tw, th, 1),
    );
    rec.flush();
    let bytes = read_back(gpu, &dst, (words * 4) as u64)?;

    let data = match kind.mode {
        PostMode::Write => {
            let mut rgb = try_alloc::<u8>(tw * th * 3, "tile output")?;
            for (px, word) in rgb.chunks_exact_mut(3).zip(bytes.chunks_exact(4)) {
                px.copy_from_slice(&word[..3]);
            }
            TileData::Rounded(rgb)
        }
        PostMode::Accumulate => TileData::Unrounded(bytes_to_f32(&bytes)),
    };
    Ok(TilePixels { rect, data })
}

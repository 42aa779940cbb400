// gpu/buffers.rs — Storage buffers, uploads and readback.
//
// Everything the network kernels touch is a plain storage buffer:
//
//   GpuTensor      planar CHW f32, same layout as `tensor::Tensor`
//   packed bytes   u8 images packed four per u32 (WGSL has no u8 type)
//   weights        f32 arrays uploaded once per model
//
// READBACK
// ────────
// Buffers with STORAGE usage cannot be mapped. Readback copies into a
// MAP_READ | COPY_DST staging buffer, submits, then blocks:
//
//   encoder.copy_buffer_to_buffer(src → staging)
//   queue.submit
//   staging.slice(..).map_async(Read, cb)
//   device.poll(Maintain::Wait)          ← cb fires inside here
//
// The callback's result travels back through an mpsc channel.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};

/// Storage buffers must be at least 4 bytes and sized in whole words.
const MIN_BUFFER: u64 = 4;

/// A CHW f32 tensor resident on the GPU.
pub struct GpuTensor {
    pub buffer: wgpu::Buffer,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl GpuTensor {
    /// Uninitialized device tensor.
    pub fn empty(gpu: &GpuDevice, label: &str, channels: usize, height: usize, width: usize) -> Self {
        let bytes = (channels * height * width * 4) as u64;
        GpuTensor { buffer: storage_buffer(gpu, label, bytes), channels, height, width }
    }

    /// Number of f32 elements.
    pub fn elements(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// A zero-initialized storage buffer usable as kernel input, output and copy
/// source.
pub fn storage_buffer(gpu: &GpuDevice, label: &str, bytes: u64) -> wgpu::Buffer {
    gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: align_to(bytes.max(MIN_BUFFER), 4),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Upload an f32 slice as a storage buffer.
pub fn upload_f32(gpu: &GpuDevice, label: &str, data: &[f32]) -> wgpu::Buffer {
    if data.is_empty() {
        return storage_buffer(gpu, label, MIN_BUFFER);
    }
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
    })
}

/// Upload a u32 slice as a storage buffer.
pub fn upload_u32(gpu: &GpuDevice, label: &str, data: &[u32]) -> wgpu::Buffer {
    if data.is_empty() {
        return storage_buffer(gpu, label, MIN_BUFFER);
    }
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    })
}

/// Upload a `#[repr(C)]` params struct as a uniform buffer.
pub fn uniform<T: bytemuck::Pod>(gpu: &GpuDevice, label: &str, params: &T) -> wgpu::Buffer {
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(params),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Pack bytes little-endian, four per word; the tail is zero-filled.
pub fn pack_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut w = [0u8; 4];
            w[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(w)
        })
        .collect()
}

/// Reinterpret little-endian readback bytes as f32. The mapped range is
/// copied into a `Vec<u8>` first, which carries no 4-byte alignment
/// guarantee, so this decodes instead of casting.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Copy `bytes` bytes of `src` to the host. Expensive and synchronous: it
/// stalls until every submitted command has finished.
pub fn read_back(gpu: &GpuDevice, src: &wgpu::Buffer, bytes: u64) -> Result<Vec<u8>, GpuError> {
    let size = align_to(bytes.max(MIN_BUFFER), 4);
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        // The receiver outlives the poll below; a closed channel only means
        // the caller already bailed out.
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| GpuError::Map("map callback never fired".into()))?
        .map_err(|e| GpuError::Map(e.to_string()))?;

    let mapped = slice.get_mapped_range();
    let out = mapped[..bytes as usize].to_vec();
    drop(mapped);
    staging.unmap();
    Ok(out)
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(1, 4), 4);
        assert_eq!(align_to(12, 4), 12);
    }

    #[test]
    fn test_bytes_to_f32() {
        let mut bytes = 1.5f32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-2.0f32).to_le_bytes());
        assert_eq!(bytes_to_f32(&bytes), vec![1.5, -2.0]);
    }

    #[test]
    fn test_pack_bytes_little_endian_with_tail() {
        let words = pack_bytes(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(words, vec![0x0403_0201, 0x0000_0605]);
    }
}

// gpu/mod.rs — wgpu compute backend.
//
// The CPU path in the parent crate (`network`, `stages`) is the reference;
// everything here mirrors it kernel for kernel and is validated against it.
//
//   device    adapter enumeration, device acquisition, limits → budget
//   buffers   storage buffers, uploads, blocking readback
//   kernels   compiled pipelines, params uniforms, command recording
//   network   layer-by-layer forward pass with SE statistics
//   stages    tile upload + preproc, postproc + readback
//   backend   `Backend` implementation, one error scope per tile
//
// Orchestration (tiling, sync-gap, TTA) never sees any of this; it only
// holds a `dyn Backend`.

pub mod backend;
pub mod buffers;
pub mod device;
pub mod kernels;
pub mod network;
pub mod stages;

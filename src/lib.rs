// supertile: tiled CUNet super-resolution on wgpu compute
// CPU reference path and GPU port of the same operator set
//
// Large images are cut into memory-bounded tiles, each tile runs
// pre → network → post, seams are reconciled by sharing channel statistics
// across tiles (sync-gap), and the eight flip/rotation variants can be
// averaged (TTA).

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod gpu;
pub mod image;
pub mod model;
pub mod network;
pub mod stages;
pub mod syncgap;
pub mod tensor;
pub mod tile;
pub mod tta;
pub mod upscaler;

#[cfg(feature = "image")]
pub mod interop;

pub use config::{default_prepadding, Config, NoiseLevel, SyncGap};
pub use device::{device_count, heap_budget, DeviceContext, DeviceSelector, HOST_HEAP_BUDGET};
pub use error::{Result, UpscaleError};
pub use image::{Image, ImageView, ImageViewMut};
pub use model::{encode_weights, model_paths, Model, ModelFamily, Topology};
pub use tensor::Tensor;
pub use upscaler::{Upscaler, UpscalerBuilder, UpscalerState};

// device.rs — Device selection and lifecycle.
//
// A `DeviceContext` owns at most one acquired GPU. It is created once per
// upscaler, reports the memory budget the tile planner works against, and
// releases the device on `teardown()` or drop, whichever comes first.
//
// The CPU "device" acquires nothing; its budget is a fixed host working-set
// size.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::gpu::device::{self as gpu_device, GpuDevice};

/// Working-set budget assumed for CPU execution.
pub const HOST_HEAP_BUDGET: u64 = 2 << 30;

/// Which device runs the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    Cpu,
    /// Index into the hardware GPU adapters (software rasterizers excluded).
    Gpu(usize),
}

/// Number of hardware GPUs visible to this process.
pub fn device_count() -> usize {
    gpu_device::adapter_count()
}

/// Memory budget of a device without acquiring it.
pub fn heap_budget(selector: DeviceSelector) -> Result<u64> {
    match selector {
        DeviceSelector::Cpu => Ok(HOST_HEAP_BUDGET),
        DeviceSelector::Gpu(index) => Ok(gpu_device::adapter_budget(index)?),
    }
}

/// The device an upscaler runs on.
pub struct DeviceContext {
    selector: DeviceSelector,
    gpu: Option<Arc<GpuDevice>>,
    released: bool,
}

impl DeviceContext {
    /// Acquire the selected device. An out-of-range GPU index is a
    /// configuration error.
    pub fn new(selector: DeviceSelector) -> Result<Self> {
        let mut ctx = DeviceContext { selector: DeviceSelector::Cpu, gpu: None, released: true };
        ctx.select(selector)?;
        Ok(ctx)
    }

    /// Switch to another device, releasing the current one first. On error
    /// the context is left released.
    pub fn select(&mut self, selector: DeviceSelector) -> Result<()> {
        self.teardown();
        if let DeviceSelector::Gpu(index) = selector {
            self.gpu = Some(Arc::new(GpuDevice::new(index)?));
        } else {
            info!("CPU device selected");
        }
        self.selector = selector;
        self.released = false;
        Ok(())
    }

    pub fn selector(&self) -> DeviceSelector {
        self.selector
    }

    /// Number of hardware GPUs visible to this process.
    pub fn device_count(&self) -> usize {
        device_count()
    }

    /// Budget of the active device.
    pub fn heap_budget(&self) -> u64 {
        match &self.gpu {
            Some(gpu) => gpu.heap_budget(),
            None => HOST_HEAP_BUDGET,
        }
    }

    /// Shared handle to the acquired GPU, if any.
    pub fn gpu(&self) -> Option<Arc<GpuDevice>> {
        self.gpu.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the device. Safe to call repeatedly and when nothing was
    /// acquired.
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        if let Some(gpu) = self.gpu.take() {
            info!(adapter = %gpu.adapter_info, "releasing GPU device");
        }
        self.released = true;
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

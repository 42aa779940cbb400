// error.rs — Error taxonomy for the upscaler.
//
// Every fallible operation in the crate returns `Result<T>` with one of the
// five kinds below. The kind tells the caller what to do next:
//
//   Config   — fix the configuration; nothing ran.
//   Load     — the model artifacts are bad; the instance stays unusable.
//   Resource — an allocation failed mid-call; the instance is still usable.
//   Input    — the buffers handed to `process` are inconsistent.
//   State    — `process` was called before the upscaler reached `Ready`.

use crate::gpu::device::GpuError;

/// Errors returned by the upscaler and its components.
#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    /// Invalid device index, tile size below the viable minimum, or a
    /// scale/noise combination the loaded model does not provide.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unreadable or malformed model artifacts.
    #[error("model load error: {0}")]
    Load(String),

    /// Device or host allocation failure during a process call.
    #[error("resource error: {0}")]
    Resource(String),

    /// Channel count mismatch, wrong output size, zero-area image.
    #[error("input error: {0}")]
    Input(String),

    /// The upscaler is not in the `Ready` state.
    #[error("upscaler is {state}, process requires ready")]
    State { state: &'static str },
}

pub type Result<T> = std::result::Result<T, UpscaleError>;

impl From<GpuError> for UpscaleError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::InvalidAdapter { .. } => UpscaleError::Config(err.to_string()),
            other => UpscaleError::Resource(other.to_string()),
        }
    }
}

/// Reserve a zeroed `Vec` of `len` elements, reporting allocation failure
/// as a resource error instead of aborting.
pub(crate) fn try_alloc<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| {
        UpscaleError::Resource(format!("cannot allocate {what} ({len} elements): {e}"))
    })?;
    v.resize(len, T::default());
    Ok(v)
}

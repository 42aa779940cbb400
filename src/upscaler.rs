// upscaler.rs — The public facade: state machine and per-call orchestration.
//
//   Upscaler::new(config)      validate, acquire device      → Uninitialized
//   load_model / load*         attach a matching model       → Loaded
//   prepare()                  build backend, check geometry → Ready
//   process(src, dst)          only in Ready
//
// One process call:
//
//   validate buffers ─▶ [per TTA transform:
//                          sync-gap coordination ─▶ barrier ─▶ plan tiles
//                          ─▶ backend.run_tiles (write | accumulate)]
//                    ─▶ (TTA) mean + round once
//                    ─▶ (RGBA) bilinear alpha
//
// `process` takes `&mut self`, so a single instance is never driven from
// two threads at once.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::backend::{Backend, CpuBackend};
use crate::config::{Config, NoiseLevel, SyncGap};
use crate::device::{DeviceContext, DeviceSelector};
use crate::error::{Result, UpscaleError};
use crate::gpu::backend::GpuBackend;
use crate::image::{Image, ImageView, ImageViewMut};
use crate::model::{Model, ModelFamily};
use crate::stages::{self, OutputSink};
use crate::syncgap;
use crate::tile::{plan_tiles, TileParams, TilePlan};
use crate::tta::{Transform, TtaAccumulator};

/// Lifecycle of an [`Upscaler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscalerState {
    Uninitialized,
    Loaded,
    Ready,
}

impl UpscalerState {
    fn as_str(self) -> &'static str {
        match self {
            UpscalerState::Uninitialized => "uninitialized",
            UpscalerState::Loaded => "loaded",
            UpscalerState::Ready => "ready",
        }
    }
}

impl fmt::Display for UpscalerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tiled super-resolution on one device with one model.
pub struct Upscaler {
    config: Config,
    ctx: DeviceContext,
    model: Option<Model>,
    /// Set when the model was picked from a released family.
    family: Option<ModelFamily>,
    backend: Option<Box<dyn Backend>>,
    params: Option<TileParams>,
    initial_plan: Option<TilePlan>,
    state: UpscalerState,
}

impl Upscaler {
    /// Validate `config` and acquire its device.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let ctx = DeviceContext::new(config.device)?;
        info!(
            device = ?config.device,
            scale = config.scale,
            noise = config.noise.level(),
            sync_gap = ?config.sync_gap,
            tta = config.tta,
            "upscaler created"
        );
        Ok(Upscaler {
            config,
            ctx,
            model: None,
            family: None,
            backend: None,
            params: None,
            initial_plan: None,
            state: UpscalerState::Uninitialized,
        })
    }

    pub fn state(&self) -> UpscalerState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// Number of hardware GPUs visible to this process.
    pub fn device_count(&self) -> usize {
        self.ctx.device_count()
    }

    /// Sync-gap mode `process` runs: the configured mode, or `Off` for a
    /// model loaded from a family whose models do not allow coordination.
    pub fn sync_gap(&self) -> SyncGap {
        match self.family {
            Some(family) if !family.allows_sync_gap() => SyncGap::Off,
            _ => self.config.sync_gap,
        }
    }

    /// Budget tile planning works against: the configured override, else
    /// what the device reports.
    pub fn heap_budget(&self) -> u64 {
        self.config.heap_budget.unwrap_or_else(|| self.ctx.heap_budget())
    }

    /// Geometry resolved by `prepare()` for a square image of one tile edge.
    pub fn initial_plan(&self) -> Option<&TilePlan> {
        self.initial_plan.as_ref()
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Attach an already-loaded model. Its scale and noise level must match
    /// the configuration.
    pub fn load_model(&mut self, model: Model) -> Result<()> {
        self.reset();
        if model.scale() != self.config.scale || model.noise() != self.config.noise {
            return Err(UpscaleError::Config(format!(
                "model `{}` is {}x/{:?}, configuration asks for {}x/{:?}",
                model.name(),
                model.scale(),
                model.noise(),
                self.config.scale,
                self.config.noise
            )));
        }
        self.model = Some(model);
        self.state = UpscalerState::Loaded;
        Ok(())
    }

    /// Load from topology and weights readers.
    pub fn load(&mut self, topology: impl std::io::Read, weights: impl std::io::Read) -> Result<()> {
        self.reset();
        let model = Model::load(topology, weights)?;
        self.load_model(model)
    }

    pub fn load_files(&mut self, topology: impl AsRef<Path>, weights: impl AsRef<Path>) -> Result<()> {
        self.reset();
        let model = Model::load_files(topology, weights)?;
        self.load_model(model)
    }

    /// Load the model for the configured scale and noise from a model tree.
    pub fn load_named(&mut self, root: impl AsRef<Path>, family: ModelFamily) -> Result<()> {
        self.reset();
        let model = Model::load_named(root, family, self.config.scale, self.config.noise)?;
        self.load_model(model)?;
        self.family = Some(family);
        if !family.allows_sync_gap() && self.config.sync_gap != SyncGap::Off {
            debug!(family = family.dir_name(), requested = ?self.config.sync_gap, "model family runs with sync-gap off");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.model = None;
        self.family = None;
        self.backend = None;
        self.params = None;
        self.initial_plan = None;
        self.state = UpscalerState::Uninitialized;
    }

    // -----------------------------------------------------------------------
    // Prepare
    // -----------------------------------------------------------------------

    /// Build the compute backend and resolve tile geometry.
    pub fn prepare(&mut self) -> Result<()> {
        if self.ctx.is_released() {
            return Err(UpscaleError::State { state: "torn down" });
        }
        let model = match (&self.model, self.state) {
            (Some(model), UpscalerState::Loaded | UpscalerState::Ready) => model,
            _ => return Err(UpscaleError::State { state: self.state.as_str() }),
        };
        let scale = model.scale() as usize;
        let prepadding = self.config.resolved_prepadding();
        if model.border() > prepadding * scale {
            return Err(UpscaleError::Config(format!(
                "model `{}` crops {} output pixels per side, prepadding {prepadding} covers {}",
                model.name(),
                model.border(),
                prepadding * scale
            )));
        }

        let backend: Box<dyn Backend> = match self.ctx.selector() {
            DeviceSelector::Cpu => Box::new(CpuBackend::new(self.config.threads)?),
            DeviceSelector::Gpu(_) => {
                let gpu = self.ctx.gpu().ok_or(UpscaleError::State { state: "torn down" })?;
                Box::new(GpuBackend::new(gpu, model)?)
            }
        };

        let params = TileParams {
            tile_size: self.config.tile_size,
            prepadding,
            scale,
            alignment: model.alignment(),
            headroom: self.config.memory_headroom,
        };
        let budget = self.heap_budget();
        let probe = match params.tile_size {
            0 => crate::tile::AUTO_TILE_SIZE.max(params.min_edge()),
            n => n,
        };
        let plan = plan_tiles(probe, probe, &params, budget, |w, h| backend.estimate(model, w, h))?;
        info!(
            backend = backend.name(),
            model = model.name(),
            prepadding,
            tile_edge = plan.edge,
            budget,
            "upscaler ready"
        );

        self.backend = Some(backend);
        self.params = Some(params);
        self.initial_plan = Some(plan);
        self.state = UpscalerState::Ready;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Process
    // -----------------------------------------------------------------------

    /// Upscale `src` into `dst`, which must be exactly `scale ×` larger with
    /// the same channel count (3 or 4).
    pub fn process(&mut self, src: &ImageView<u8>, dst: &mut ImageViewMut<u8>) -> Result<()> {
        let (model, backend, params) = match (&self.model, &self.backend, &self.params, self.state) {
            (Some(m), Some(b), Some(p), UpscalerState::Ready) => (m, b.as_ref(), p),
            _ => return Err(UpscaleError::State { state: self.state.as_str() }),
        };
        let scale = model.scale() as usize;
        check_buffers(src, dst, scale)?;
        let budget = self.config.heap_budget.unwrap_or_else(|| self.ctx.heap_budget());
        let sync_gap = self.sync_gap();

        if self.config.tta {
            let (ow, oh) = (dst.width(), dst.height());
            let mut acc = TtaAccumulator::new(ow, oh)?;
            for t in Transform::ALL {
                let input = t.apply(src);
                let (tw, th) = t.output_size(ow, oh);
                let mut out = Image::<f32>::try_new(tw, th, 3)?;
                run_pass(backend, model, &input.view(), params, budget, sync_gap, &mut OutputSink::Accumulate(&mut out))?;
                acc.add(t, &out);
                debug!(transform = ?t, "tta pass done");
            }
            acc.finish(dst);
        } else {
            run_pass(backend, model, src, params, budget, sync_gap, &mut OutputSink::Write(&mut *dst))?;
        }

        if src.channels() == 4 {
            let alpha = stages::resample_alpha(src, dst.width(), dst.height())?;
            stages::write_alpha(dst, &alpha);
        }
        Ok(())
    }

    /// Upscale into a newly allocated image.
    pub fn process_image(&mut self, src: &Image<u8>) -> Result<Image<u8>> {
        let scale = match (&self.model, self.state) {
            (Some(m), UpscalerState::Ready) => m.scale() as usize,
            _ => return Err(UpscaleError::State { state: self.state.as_str() }),
        };
        let mut out = Image::try_new(src.width() * scale, src.height() * scale, src.channels())?;
        self.process(&src.view(), &mut out.view_mut())?;
        Ok(out)
    }

    /// Release the backend and the device. The upscaler returns to
    /// `Uninitialized` and cannot be prepared again. Idempotent.
    pub fn teardown(&mut self) {
        self.reset();
        self.ctx.teardown();
    }
}

fn check_buffers(src: &ImageView<u8>, dst: &ImageViewMut<u8>, scale: usize) -> Result<()> {
    if !matches!(src.channels(), 3 | 4) {
        return Err(UpscaleError::Input(format!("{} channels, expected 3 or 4", src.channels())));
    }
    if src.channels() != dst.channels() {
        return Err(UpscaleError::Input(format!(
            "input has {} channels, output {}",
            src.channels(),
            dst.channels()
        )));
    }
    if src.width() == 0 || src.height() == 0 {
        return Err(UpscaleError::Input("zero-area input".into()));
    }
    if dst.width() != src.width() * scale || dst.height() != src.height() * scale {
        return Err(UpscaleError::Input(format!(
            "output is {}×{}, expected {}×{}",
            dst.width(),
            dst.height(),
            src.width() * scale,
            src.height() * scale
        )));
    }
    Ok(())
}

/// One full pipeline pass: coordinate, plan, run every tile into `sink`.
fn run_pass(
    backend: &dyn Backend,
    model: &Model,
    src: &ImageView<u8>,
    params: &TileParams,
    budget: u64,
    sync_gap: SyncGap,
    sink: &mut OutputSink<'_, '_>,
) -> Result<()> {
    let coord = syncgap::coordinate(backend, model, src, sync_gap, params, budget)?;
    let plan = plan_tiles(src.width(), src.height(), params, budget, |w, h| backend.estimate(model, w, h))?;
    debug!(
        backend = backend.name(),
        tiles = plan.len(),
        edge = plan.edge,
        sync_gap = ?coord.mode,
        "running tiles"
    );
    backend.run_tiles(model, src, &plan, &coord.stats, sink)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum ModelSource {
    Files(PathBuf, PathBuf),
    Bytes(Vec<u8>, Vec<u8>),
    Named(PathBuf, ModelFamily),
    Loaded(Box<Model>),
}

/// One-shot construction: configure, load, prepare.
///
/// ```no_run
/// use supertile::{ModelFamily, NoiseLevel, UpscalerBuilder};
///
/// let mut up = UpscalerBuilder::new()
///     .cpu()
///     .scale(2)
///     .noise(NoiseLevel::Denoise1x)
///     .model_dir("models", ModelFamily::Se)
///     .build()?;
/// # Ok::<(), supertile::UpscaleError>(())
/// ```
pub struct UpscalerBuilder {
    config: Config,
    source: Option<ModelSource>,
}

impl Default for UpscalerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UpscalerBuilder {
    pub fn new() -> Self {
        UpscalerBuilder { config: Config::default(), source: None }
    }

    /// Start from an existing configuration.
    pub fn with_config(config: Config) -> Self {
        UpscalerBuilder { config, source: None }
    }

    pub fn gpu(mut self, index: usize) -> Self {
        self.config.device = DeviceSelector::Gpu(index);
        self
    }

    pub fn cpu(mut self) -> Self {
        self.config.device = DeviceSelector::Cpu;
        self
    }

    pub fn tta(mut self, enabled: bool) -> Self {
        self.config.tta = enabled;
        self
    }

    pub fn tile_size(mut self, edge: usize) -> Self {
        self.config.tile_size = edge;
        self
    }

    pub fn sync_gap(mut self, mode: SyncGap) -> Self {
        self.config.sync_gap = mode;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn noise(mut self, noise: NoiseLevel) -> Self {
        self.config.noise = noise;
        self
    }

    pub fn prepadding(mut self, prepadding: usize) -> Self {
        self.config.prepadding = Some(prepadding);
        self
    }

    pub fn heap_budget(mut self, bytes: u64) -> Self {
        self.config.heap_budget = Some(bytes);
        self
    }

    pub fn model_files(mut self, topology: impl Into<PathBuf>, weights: impl Into<PathBuf>) -> Self {
        self.source = Some(ModelSource::Files(topology.into(), weights.into()));
        self
    }

    pub fn model_bytes(mut self, topology: impl Into<Vec<u8>>, weights: impl Into<Vec<u8>>) -> Self {
        self.source = Some(ModelSource::Bytes(topology.into(), weights.into()));
        self
    }

    /// Pick the model for the configured scale and noise from a model tree
    /// (`root/models-se/up2x-conservative.json` and so on). Models of a
    /// family that does not allow sync-gap run with it off.
    pub fn model_dir(mut self, root: impl Into<PathBuf>, family: ModelFamily) -> Self {
        self.source = Some(ModelSource::Named(root.into(), family));
        self
    }

    pub fn model(mut self, model: Model) -> Self {
        self.source = Some(ModelSource::Loaded(Box::new(model)));
        self
    }

    /// Create, load and prepare. A builder without a model source is a
    /// configuration error.
    pub fn build(self) -> Result<Upscaler> {
        let source = self
            .source
            .ok_or_else(|| UpscaleError::Config("no model given to the builder".into()))?;
        let mut up = Upscaler::new(self.config)?;
        match source {
            ModelSource::Files(t, w) => up.load_files(t, w)?,
            ModelSource::Bytes(t, w) => up.load(t.as_slice(), w.as_slice())?,
            ModelSource::Named(root, family) => up.load_named(root, family)?,
            ModelSource::Loaded(model) => up.load_model(*model)?,
        }
        up.prepare()?;
        Ok(up)
    }
}

// model.rs — CUNet model artifacts: topology descriptor, weights, shape
// inference and memory estimation.
//
// A model is two files:
//
//   up2x-conservative.json   topology (serde JSON, see `Topology`)
//   up2x-conservative.bin    weights  (little-endian blob, see below)
//
// WEIGHTS FORMAT
// ──────────────
//   magic    b"SRWB"
//   version  u32 = 1
//   count    u32
//   count × {
//     name_len u32, name (UTF-8), elems u32, elems × f32
//   }
//
// Tensor naming, per layer `name`:
//   conv    name.weight [out][in][k][k],  name.bias [out]
//   deconv  name.weight [in][out][k][k],  name.bias [out]
//   se      name.fc1.weight [hidden][c], name.fc1.bias [hidden],
//           name.fc2.weight [c][hidden], name.fc2.bias [c]
//
// Loading validates everything up front: blob references, channel counts,
// element counts. After `Model::load*` succeeds, the forward pass can only
// fail on input geometry or allocation.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::NoiseLevel;
use crate::error::{Result, UpscaleError};
use crate::network::{self, ForwardOutput, StatsRequest};
use crate::tensor::Tensor;

const WEIGHTS_MAGIC: &[u8; 4] = b"SRWB";
const WEIGHTS_VERSION: u32 = 1;

/// Largest probe edge tried when measuring how much border the network
/// crops away.
const MAX_PROBE_EDGE: usize = 1024;

// ---------------------------------------------------------------------------
// Topology descriptor
// ---------------------------------------------------------------------------

fn one() -> usize {
    1
}

fn three() -> usize {
    3
}

/// Parsed topology descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub scale: u32,
    /// -1 (conservative), 0 (none), 1, 2, 3.
    pub noise: i32,
    /// Input width and height must be multiples of this.
    #[serde(default = "one")]
    pub alignment: usize,
    #[serde(default = "three")]
    pub in_channels: usize,
    #[serde(default = "three")]
    pub out_channels: usize,
    /// Output adds the nearest-upsampled input.
    #[serde(default)]
    pub residual: bool,
    pub input: String,
    pub output: String,
    pub layers: Vec<LayerSpec>,
}

/// Shared shape of `conv` and `deconv` layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvSpec {
    pub name: String,
    pub input: String,
    pub output: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub pad: usize,
    /// Leaky-ReLU negative slope; `Some(0.0)` is plain ReLU.
    #[serde(default)]
    pub leaky: Option<f32>,
}

/// One layer of the topology, tagged by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LayerSpec {
    Conv(ConvSpec),
    Deconv(ConvSpec),
    Se {
        name: String,
        input: String,
        output: String,
        channels: usize,
        hidden: usize,
    },
    Add {
        name: String,
        inputs: [String; 2],
        output: String,
    },
    Crop {
        name: String,
        input: String,
        output: String,
        border: usize,
    },
}

impl LayerSpec {
    fn name(&self) -> &str {
        match self {
            LayerSpec::Conv(c) | LayerSpec::Deconv(c) => &c.name,
            LayerSpec::Se { name, .. } | LayerSpec::Add { name, .. } | LayerSpec::Crop { name, .. } => {
                name
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Weights blob
// ---------------------------------------------------------------------------

/// Serialize named tensors into the weights format.
pub fn encode_weights(tensors: &[(&str, &[f32])]) -> Vec<u8> {
    let payload: usize = tensors.iter().map(|(n, d)| 8 + n.len() + d.len() * 4).sum();
    let mut out = Vec::with_capacity(12 + payload);
    out.extend_from_slice(WEIGHTS_MAGIC);
    out.extend_from_slice(&WEIGHTS_VERSION.to_le_bytes());
    out.extend_from_slice(&(tensors.len() as u32).to_le_bytes());
    for (name, data) in tensors {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        for v in data.iter() {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Parse the weights format into a name → data map.
pub fn decode_weights(bytes: &[u8]) -> Result<HashMap<String, Vec<f32>>> {
    let mut r = ByteReader { bytes, pos: 0 };
    if r.take(4)? != WEIGHTS_MAGIC {
        return Err(UpscaleError::Load("weights: bad magic".into()));
    }
    let version = r.u32()?;
    if version != WEIGHTS_VERSION {
        return Err(UpscaleError::Load(format!("weights: unsupported version {version}")));
    }
    let count = r.u32()? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let name_len = r.u32()? as usize;
        let name = std::str::from_utf8(r.take(name_len)?)
            .map_err(|_| UpscaleError::Load("weights: tensor name is not UTF-8".into()))?
            .to_string();
        let elems = r.u32()? as usize;
        let raw = r.take(elems.checked_mul(4).ok_or_else(truncated)?)?;
        let data = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if map.insert(name.clone(), data).is_some() {
            return Err(UpscaleError::Load(format!("weights: duplicate tensor `{name}`")));
        }
    }
    if r.pos != bytes.len() {
        return Err(UpscaleError::Load(format!(
            "weights: {} trailing bytes",
            bytes.len() - r.pos
        )));
    }
    Ok(map)
}

fn truncated() -> UpscaleError {
    UpscaleError::Load("weights: truncated".into())
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len()).ok_or_else(truncated)?;
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ---------------------------------------------------------------------------
// Compiled layers
// ---------------------------------------------------------------------------

/// Convolution or transposed convolution with its weights.
#[derive(Debug, Clone)]
pub(crate) struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
    pub leaky: Option<f32>,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvLayer {
    /// Output extent along one axis, `None` if the input is too small.
    pub fn conv_extent(&self, n: usize) -> Option<usize> {
        let padded = n + 2 * self.pad;
        (padded >= self.kernel).then(|| (padded - self.kernel) / self.stride + 1)
    }

    pub fn deconv_extent(&self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        let full = (n - 1) * self.stride + self.kernel;
        (full > 2 * self.pad).then(|| full - 2 * self.pad)
    }
}

/// Squeeze-excitation block: the layer whose channel means are reconciled.
#[derive(Debug, Clone)]
pub(crate) struct SeLayer {
    pub channels: usize,
    pub hidden: usize,
    pub fc1_weight: Vec<f32>,
    pub fc1_bias: Vec<f32>,
    pub fc2_weight: Vec<f32>,
    pub fc2_bias: Vec<f32>,
    /// Position among the model's statistic layers.
    pub stat_index: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Conv(ConvLayer),
    Deconv(ConvLayer),
    Se(SeLayer),
    Add,
    Crop(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<usize>,
    pub output: usize,
}

// ---------------------------------------------------------------------------
// Model families on disk
// ---------------------------------------------------------------------------

/// Released model sets, each in its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Squeeze-excitation models (the default set).
    Se,
    /// Retrained "pro" models.
    Pro,
    /// Models without SE blocks; nothing to reconcile.
    Nose,
}

impl ModelFamily {
    pub fn dir_name(self) -> &'static str {
        match self {
            ModelFamily::Se => "models-se",
            ModelFamily::Pro => "models-pro",
            ModelFamily::Nose => "models-nose",
        }
    }

    /// Whether the family's released models were trained to run with
    /// sync-gap coordination. The `se` set was not; its models always run
    /// with sync-gap off when loaded by family.
    pub fn allows_sync_gap(self) -> bool {
        !matches!(self, ModelFamily::Se)
    }
}

/// `(topology, weights)` paths for a model under `root`, e.g.
/// `root/models-se/up2x-conservative.{json,bin}`.
pub fn model_paths(root: &Path, family: ModelFamily, scale: u32, noise: NoiseLevel) -> (PathBuf, PathBuf) {
    let stem = format!("up{scale}x-{}", noise.file_stem());
    let dir = root.join(family.dir_name());
    (dir.join(format!("{stem}.json")), dir.join(format!("{stem}.bin")))
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A loaded, immutable CUNet model.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    scale: u32,
    noise: NoiseLevel,
    alignment: usize,
    in_channels: usize,
    residual: bool,
    pub(crate) nodes: Vec<Node>,
    pub(crate) blob_count: usize,
    pub(crate) input_blob: usize,
    pub(crate) output_blob: usize,
    /// Index of the last node reading each blob; `usize::MAX` for the output.
    pub(crate) last_use: Vec<usize>,
    stat_layers: usize,
    /// Output pixels cropped away per side, measured on an aligned probe.
    border: usize,
}

impl Model {
    /// Load from a topology reader and a weights reader.
    pub fn load<T: Read, W: Read>(mut topology: T, mut weights: W) -> Result<Model> {
        let mut t = Vec::new();
        topology
            .read_to_end(&mut t)
            .map_err(|e| UpscaleError::Load(format!("reading topology: {e}")))?;
        let mut w = Vec::new();
        weights
            .read_to_end(&mut w)
            .map_err(|e| UpscaleError::Load(format!("reading weights: {e}")))?;
        Model::from_bytes(&t, &w)
    }

    /// Load from a topology file and a weights file.
    pub fn load_files(topology: impl AsRef<Path>, weights: impl AsRef<Path>) -> Result<Model> {
        let read = |p: &Path| {
            fs::read(p).map_err(|e| UpscaleError::Load(format!("{}: {e}", p.display())))
        };
        let t = read(topology.as_ref())?;
        let w = read(weights.as_ref())?;
        Model::from_bytes(&t, &w)
    }

    /// Load the model for `scale`/`noise` from a model directory tree.
    pub fn load_named(root: impl AsRef<Path>, family: ModelFamily, scale: u32, noise: NoiseLevel) -> Result<Model> {
        let (t, w) = model_paths(root.as_ref(), family, scale, noise);
        Model::load_files(t, w)
    }

    pub fn from_bytes(topology: &[u8], weights: &[u8]) -> Result<Model> {
        let topology: Topology = serde_json::from_slice(topology)
            .map_err(|e| UpscaleError::Load(format!("topology: {e}")))?;
        let weights = decode_weights(weights)?;
        Model::from_parts(topology, weights)
    }

    /// Build a model from an already-parsed topology and weight map.
    pub fn from_parts(topology: Topology, mut weights: HashMap<String, Vec<f32>>) -> Result<Model> {
        let load_err = |msg: String| UpscaleError::Load(format!("{}: {msg}", topology.name));

        if !(2..=4).contains(&topology.scale) {
            return Err(load_err(format!("unsupported scale {}", topology.scale)));
        }
        let noise = NoiseLevel::from_level(topology.noise)
            .ok_or_else(|| load_err(format!("unsupported noise level {}", topology.noise)))?;
        if topology.alignment == 0 {
            return Err(load_err("alignment must be at least 1".into()));
        }
        if topology.in_channels != 3 || topology.out_channels != 3 {
            return Err(load_err(format!(
                "expected 3 input and output channels, got {} and {}",
                topology.in_channels, topology.out_channels
            )));
        }

        let mut blob_ids: HashMap<String, usize> = HashMap::new();
        let mut blob_channels: Vec<usize> = Vec::new();
        blob_ids.insert(topology.input.clone(), 0);
        blob_channels.push(topology.in_channels);

        let mut nodes = Vec::with_capacity(topology.layers.len());
        let mut stat_layers = 0;

        for spec in &topology.layers {
            let lname = spec.name().to_string();
            let lookup = |blob: &str| {
                blob_ids
                    .get(blob)
                    .copied()
                    .ok_or_else(|| load_err(format!("layer `{lname}` reads undefined blob `{blob}`")))
            };
            let (op, inputs, out_name, out_channels) = match spec {
                LayerSpec::Conv(c) | LayerSpec::Deconv(c) => {
                    let src = lookup(&c.input)?;
                    if blob_channels[src] != c.in_channels {
                        return Err(load_err(format!(
                            "layer `{}` expects {} channels, blob `{}` has {}",
                            c.name, c.in_channels, c.input, blob_channels[src]
                        )));
                    }
                    if c.kernel == 0 || c.stride == 0 {
                        return Err(load_err(format!("layer `{}` has zero kernel or stride", c.name)));
                    }
                    let wlen = c.in_channels * c.out_channels * c.kernel * c.kernel;
                    let layer = ConvLayer {
                        in_channels: c.in_channels,
                        out_channels: c.out_channels,
                        kernel: c.kernel,
                        stride: c.stride,
                        pad: c.pad,
                        leaky: c.leaky,
                        weight: take_weight(&mut weights, &format!("{}.weight", c.name), wlen)
                            .map_err(&load_err)?,
                        bias: take_weight(&mut weights, &format!("{}.bias", c.name), c.out_channels)
                            .map_err(&load_err)?,
                    };
                    let op = if matches!(spec, LayerSpec::Conv(_)) {
                        Op::Conv(layer)
                    } else {
                        Op::Deconv(layer)
                    };
                    (op, vec![src], &c.output, c.out_channels)
                }
                LayerSpec::Se { name, input, output, channels, hidden } => {
                    let src = lookup(input)?;
                    if blob_channels[src] != *channels {
                        return Err(load_err(format!(
                            "layer `{name}` expects {channels} channels, blob `{input}` has {}",
                            blob_channels[src]
                        )));
                    }
                    let (c, h) = (*channels, *hidden);
                    let layer = SeLayer {
                        channels: c,
                        hidden: h,
                        fc1_weight: take_weight(&mut weights, &format!("{name}.fc1.weight"), h * c)
                            .map_err(&load_err)?,
                        fc1_bias: take_weight(&mut weights, &format!("{name}.fc1.bias"), h)
                            .map_err(&load_err)?,
                        fc2_weight: take_weight(&mut weights, &format!("{name}.fc2.weight"), c * h)
                            .map_err(&load_err)?,
                        fc2_bias: take_weight(&mut weights, &format!("{name}.fc2.bias"), c)
                            .map_err(&load_err)?,
                        stat_index: stat_layers,
                    };
                    stat_layers += 1;
                    (Op::Se(layer), vec![src], output, c)
                }
                LayerSpec::Add { name, inputs, output } => {
                    let a = lookup(&inputs[0])?;
                    let b = lookup(&inputs[1])?;
                    if blob_channels[a] != blob_channels[b] {
                        return Err(load_err(format!(
                            "layer `{name}` adds {} and {} channels",
                            blob_channels[a], blob_channels[b]
                        )));
                    }
                    (Op::Add, vec![a, b], output, blob_channels[a])
                }
                LayerSpec::Crop { input, output, border, .. } => {
                    let src = lookup(input)?;
                    (Op::Crop(*border), vec![src], output, blob_channels[src])
                }
            };
            if blob_ids.contains_key(out_name) {
                return Err(load_err(format!("blob `{out_name}` is defined twice")));
            }
            let id = blob_channels.len();
            blob_ids.insert(out_name.clone(), id);
            blob_channels.push(out_channels);
            nodes.push(Node { name: lname, op, inputs, output: id });
        }

        let output_blob = *blob_ids
            .get(&topology.output)
            .ok_or_else(|| load_err(format!("output blob `{}` is never produced", topology.output)))?;
        if blob_channels[output_blob] != topology.out_channels {
            return Err(load_err(format!(
                "output blob has {} channels, expected {}",
                blob_channels[output_blob], topology.out_channels
            )));
        }

        let blob_count = blob_channels.len();
        let mut last_use = vec![0usize; blob_count];
        for (i, node) in nodes.iter().enumerate() {
            for &b in &node.inputs {
                last_use[b] = i;
            }
        }
        last_use[output_blob] = usize::MAX;

        let mut model = Model {
            name: topology.name.clone(),
            scale: topology.scale,
            noise,
            alignment: topology.alignment,
            in_channels: topology.in_channels,
            residual: topology.residual,
            nodes,
            blob_count,
            input_blob: 0,
            output_blob,
            last_use,
            stat_layers,
            border: 0,
        };
        model.border = model.probe_border().map_err(|e| load_err(e.to_string()))?;

        info!(
            model = %model.name,
            scale = model.scale,
            noise = model.noise.level(),
            layers = model.nodes.len(),
            stat_layers,
            border = model.border,
            "model loaded"
        );
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn noise(&self) -> NoiseLevel {
        self.noise
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Whether the output adds the nearest-upsampled input.
    pub fn residual(&self) -> bool {
        self.residual
    }

    /// Number of squeeze-excitation (channel statistic) layers.
    pub fn stat_layers(&self) -> usize {
        self.stat_layers
    }

    /// Output pixels the network crops from each side of `input × scale`.
    pub fn border(&self) -> usize {
        self.border
    }

    /// Output `(width, height)` for an input of `width × height`.
    pub fn output_size(&self, width: usize, height: usize) -> Result<(usize, usize)> {
        let shapes = self.shapes(width, height)?;
        let (_, h, w) = shapes[self.output_blob];
        Ok((w, h))
    }

    /// Peak bytes of simultaneously live activations for one forward pass
    /// over a `width × height` input. Blobs are freed after their last
    /// reader, mirroring the executors.
    pub fn peak_activation_bytes(&self, width: usize, height: usize) -> Result<u64> {
        let shapes = self.shapes(width, height)?;
        let size = |b: usize| {
            let (c, h, w) = shapes[b];
            (c * h * w) as u64
        };
        let mut live = size(self.input_blob);
        let mut peak = live;
        for (i, node) in self.nodes.iter().enumerate() {
            live += size(node.output);
            peak = peak.max(live);
            let mut freed: Vec<usize> = node.inputs.iter().copied().filter(|&b| self.last_use[b] == i).collect();
            freed.dedup();
            for b in freed {
                live -= size(b);
            }
        }
        Ok(peak * std::mem::size_of::<f32>() as u64)
    }

    /// Peak bytes when dropped activations are only reclaimed at
    /// statistics layers and after the last layer, the points where a device
    /// executor submits and waits. Between those points every activation
    /// allocated stays resident.
    pub fn deferred_peak_bytes(&self, width: usize, height: usize) -> Result<u64> {
        let shapes = self.shapes(width, height)?;
        let size = |b: usize| {
            let (c, h, w) = shapes[b];
            (c * h * w) as u64
        };
        let mut live = size(self.input_blob);
        let mut pending = 0u64;
        let mut peak = live;
        for (i, node) in self.nodes.iter().enumerate() {
            live += size(node.output);
            peak = peak.max(live + pending);
            if matches!(node.op, Op::Se(_)) {
                pending = 0;
            }
            let mut freed: Vec<usize> = node.inputs.iter().copied().filter(|&b| self.last_use[b] == i).collect();
            freed.dedup();
            for b in freed {
                live -= size(b);
                pending += size(b);
            }
        }
        Ok(peak * std::mem::size_of::<f32>() as u64)
    }

    /// Run the network on one tensor.
    pub fn infer(&self, input: &Tensor) -> Result<Tensor> {
        match network::forward(self, input.clone(), &StatsRequest::NONE)? {
            ForwardOutput::Tensor(t) => Ok(t),
            ForwardOutput::Stats(_) => Err(UpscaleError::Resource(
                "forward pass stopped early without a statistics request".into(),
            )),
        }
    }

    /// Validate an input tensor's channels and geometry.
    pub(crate) fn check_input(&self, input: &Tensor) -> Result<()> {
        let (c, h, w) = input.shape();
        if c != self.in_channels {
            return Err(UpscaleError::Input(format!(
                "model takes {} channels, tensor has {c}",
                self.in_channels
            )));
        }
        if w % self.alignment != 0 || h % self.alignment != 0 {
            return Err(UpscaleError::Input(format!(
                "tensor {w}×{h} is not a multiple of the model alignment {}",
                self.alignment
            )));
        }
        self.shapes(w, h).map(|_| ())
    }

    /// `(channels, height, width)` of every blob for a given input size.
    pub(crate) fn shapes(&self, width: usize, height: usize) -> Result<Vec<(usize, usize, usize)>> {
        if width == 0 || height == 0 {
            return Err(UpscaleError::Input("zero-area input".into()));
        }
        let mut shapes = vec![(0usize, 0usize, 0usize); self.blob_count];
        shapes[self.input_blob] = (self.in_channels, height, width);
        for node in &self.nodes {
            let (c, h, w) = shapes[node.inputs[0]];
            let collapse = || {
                UpscaleError::Input(format!(
                    "{width}×{height} input collapses to nothing at layer `{}`",
                    node.name
                ))
            };
            shapes[node.output] = match &node.op {
                Op::Conv(l) => (
                    l.out_channels,
                    l.conv_extent(h).ok_or_else(collapse)?,
                    l.conv_extent(w).ok_or_else(collapse)?,
                ),
                Op::Deconv(l) => (
                    l.out_channels,
                    l.deconv_extent(h).ok_or_else(collapse)?,
                    l.deconv_extent(w).ok_or_else(collapse)?,
                ),
                Op::Se(_) => (c, h, w),
                Op::Add => {
                    let (_, h2, w2) = shapes[node.inputs[1]];
                    (c, h.min(h2), w.min(w2))
                }
                Op::Crop(b) => {
                    if h <= 2 * b || w <= 2 * b {
                        return Err(collapse());
                    }
                    (c, h - 2 * b, w - 2 * b)
                }
            };
        }
        Ok(shapes)
    }

    /// Per-side output border, measured on the smallest aligned square the
    /// network accepts.
    fn probe_border(&self) -> Result<usize> {
        let s = self.scale as usize;
        let mut edge = self.alignment;
        while edge <= MAX_PROBE_EDGE {
            if let Ok((w, _)) = self.output_size(edge, edge) {
                let full = edge * s;
                if w > full {
                    return Err(UpscaleError::Load(format!(
                        "network output {w} exceeds input × scale {full}"
                    )));
                }
                return Ok((full - w) / 2);
            }
            edge += self.alignment;
        }
        Err(UpscaleError::Load(format!(
            "network collapses every input up to {MAX_PROBE_EDGE} pixels"
        )))
    }
}

fn take_weight(weights: &mut HashMap<String, Vec<f32>>, name: &str, expected: usize) -> std::result::Result<Vec<f32>, String> {
    let data = weights.remove(name).ok_or_else(|| format!("missing weight tensor `{name}`"))?;
    if data.len() != expected {
        return Err(format!(
            "weight tensor `{name}` has {} elements, expected {expected}",
            data.len()
        ));
    }
    Ok(data)
}

// tests/common/mod.rs — Shared fixtures: a miniature CUNet and test images.
//
// The mini network has the same shape as the released models, scaled down:
//
//   in ─ conv3 ─ f0 ─ conv2/2 ─ se0 ─ deconv2/2 ─┐
//               └──────────────────── add ◀──────┘
//                                      │
//        deconv s/s ─ crop 1 ─ se1 ─ conv3 ─ out
//
// Every conv is valid (no zero padding), so a tile's interior depends only on
// pixels within a few input pixels of it. Alignment is 2 because of the
// stride-2 pair. Border = scale + 2 output pixels per side.
//
// `isotropic` weights make every kernel constant per (out, in) pair; such a
// network commutes with flips and quarter turns on even-sized inputs, and
// maps a uniform image to a uniform image.

#![allow(dead_code)]

use supertile::{encode_weights, Config, DeviceSelector, Image, Model, NoiseLevel, SyncGap};

pub const CHANNELS: usize = 8;

/// Model variants used across the tests.
#[derive(Debug, Clone, Copy)]
pub struct Mini {
    pub scale: u32,
    pub isotropic: bool,
    /// Include the two squeeze-excitation blocks.
    pub se: bool,
}

impl Mini {
    pub fn new(scale: u32) -> Self {
        Mini { scale, isotropic: false, se: true }
    }

    pub fn isotropic(scale: u32) -> Self {
        Mini { scale, isotropic: true, se: true }
    }

    pub fn without_se(scale: u32) -> Self {
        Mini { scale, isotropic: false, se: false }
    }

    pub fn topology_json(&self) -> String {
        let s = self.scale;
        let c = CHANNELS;
        let (e, g) = if self.se { ("e", "g") } else { ("d", "cr") };
        let mut layers = vec![
            format!(r#"{{"op":"conv","name":"c0","input":"in","output":"f0","in_channels":3,"out_channels":{c},"kernel":3,"leaky":0.1}}"#),
            format!(r#"{{"op":"conv","name":"down","input":"f0","output":"d","in_channels":{c},"out_channels":{c},"kernel":2,"stride":2,"leaky":0.1}}"#),
        ];
        if self.se {
            layers.push(format!(r#"{{"op":"se","name":"se0","input":"d","output":"e","channels":{c},"hidden":2}}"#));
        }
        layers.extend([
            format!(r#"{{"op":"deconv","name":"up","input":"{e}","output":"u","in_channels":{c},"out_channels":{c},"kernel":2,"stride":2,"leaky":0.1}}"#),
            r#"{"op":"add","name":"skip","inputs":["f0","u"],"output":"sum"}"#.to_string(),
            format!(r#"{{"op":"deconv","name":"ups","input":"sum","output":"big","in_channels":{c},"out_channels":{c},"kernel":{s},"stride":{s},"leaky":0.1}}"#),
            r#"{"op":"crop","name":"trim","input":"big","output":"cr","border":1}"#.to_string(),
        ]);
        if self.se {
            layers.push(format!(r#"{{"op":"se","name":"se1","input":"cr","output":"g","channels":{c},"hidden":2}}"#));
        }
        layers.push(format!(
            r#"{{"op":"conv","name":"out","input":"{g}","output":"out","in_channels":{c},"out_channels":3,"kernel":3}}"#
        ));
        format!(
            r#"{{"name":"mini-{s}x","scale":{s},"noise":0,"alignment":2,"residual":{},"input":"in","output":"out","layers":[{}]}}"#,
            s == 4,
            layers.join(",")
        )
    }

    pub fn weights(&self) -> Vec<u8> {
        let s = self.scale as usize;
        let c = CHANNELS;
        let mut rng = Lcg(0x5eed_0000 + self.scale as u64);
        let iso = self.isotropic;

        let mut named: Vec<(String, Vec<f32>)> = Vec::new();
        let mut conv = |name: &str, rng: &mut Lcg, outer: usize, inner: usize, k: usize, gain: f32| {
            let bound = gain / ((inner * k * k) as f32).sqrt();
            named.push((format!("{name}.weight"), rng.kernel(outer, inner, k, bound, iso)));
        };
        conv("c0", &mut rng, c, 3, 3, 1.5);
        conv("down", &mut rng, c, c, 2, 1.5);
        conv("up", &mut rng, c, c, 2, 1.5);
        conv("ups", &mut rng, c, c, s, 1.5);
        conv("out", &mut rng, 3, c, 3, 0.6);

        named.push(("c0.bias".into(), rng.vec(c, 0.05)));
        named.push(("down.bias".into(), rng.vec(c, 0.05)));
        named.push(("up.bias".into(), rng.vec(c, 0.05)));
        named.push(("ups.bias".into(), rng.vec(c, 0.05)));
        // Centre the output near mid-grey so nothing saturates.
        let out_bias = if s == 4 { vec![0.0; 3] } else { vec![0.5; 3] };
        named.push(("out.bias".into(), out_bias));

        if self.se {
            for se in ["se0", "se1"] {
                named.push((format!("{se}.fc1.weight"), rng.vec(2 * c, 0.8)));
                named.push((format!("{se}.fc1.bias"), rng.vec(2, 0.1)));
                named.push((format!("{se}.fc2.weight"), rng.vec(c * 2, 0.8)));
                named.push((format!("{se}.fc2.bias"), rng.vec(c, 0.1)));
            }
        }

        let tensors: Vec<(&str, &[f32])> = named.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
        encode_weights(&tensors)
    }

    pub fn bytes(&self) -> (Vec<u8>, Vec<u8>) {
        (self.topology_json().into_bytes(), self.weights())
    }

    pub fn model(&self) -> Model {
        let (t, w) = self.bytes();
        Model::from_bytes(&t, &w).expect("mini model loads")
    }
}

/// Deterministic generator so fixtures are identical on every run.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform in [-bound, bound).
    pub fn uniform(&mut self, bound: f32) -> f32 {
        (self.next_u32() as f32 / (1u64 << 31) as f32 * 2.0 - 1.0) * bound
    }

    pub fn vec(&mut self, n: usize, bound: f32) -> Vec<f32> {
        (0..n).map(|_| self.uniform(bound)).collect()
    }

    /// `outer × inner × k × k` kernel; isotropic kernels repeat one value
    /// over the k×k window.
    pub fn kernel(&mut self, outer: usize, inner: usize, k: usize, bound: f32, isotropic: bool) -> Vec<f32> {
        let mut w = Vec::with_capacity(outer * inner * k * k);
        for _ in 0..outer * inner {
            if isotropic {
                let v = self.uniform(bound) / (k * k) as f32 * 2.0;
                w.extend(std::iter::repeat(v).take(k * k));
            } else {
                for _ in 0..k * k {
                    w.push(self.uniform(bound));
                }
            }
        }
        w
    }
}

// ===== Configurations =====

/// CPU configuration matching the mini models (noise level "none").
pub fn cpu_config(scale: u32) -> Config {
    Config {
        scale,
        noise: NoiseLevel::None,
        prepadding: Some(10),
        sync_gap: SyncGap::Off,
        tile_size: 0,
        threads: 1,
        device: DeviceSelector::Cpu,
        ..Config::default()
    }
}

// ===== Images =====

pub fn uniform(w: usize, h: usize, channels: usize, value: u8) -> Image<u8> {
    Image::filled(w, h, &vec![value; channels])
}

/// Smooth, asymmetric colour pattern.
pub fn pattern(w: usize, h: usize, channels: usize) -> Image<u8> {
    let mut img = Image::new(w, h, channels);
    for y in 0..h {
        for x in 0..w {
            let px = img.pixel_mut(x, y);
            px[0] = (x * 255 / w.max(1)) as u8;
            px[1] = (y * 255 / h.max(1)) as u8;
            px[2] = ((x * 7 + y * 13) % 256) as u8;
            if channels == 4 {
                px[3] = 255;
            }
        }
    }
    img
}

/// Pseudo-random texture.
pub fn noise(w: usize, h: usize, channels: usize, seed: u64) -> Image<u8> {
    let mut rng = Lcg(seed);
    let data = (0..w * h * channels).map(|_| (rng.next_u32() >> 24) as u8).collect();
    Image::from_vec(w, h, channels, data)
}

/// Invariant under all eight flips/rotations: depends only on the distance
/// to the nearest vertical edge and the nearest horizontal edge, summed.
pub fn symmetric(n: usize) -> Image<u8> {
    let mut img = Image::new(n, n, 3);
    for y in 0..n {
        for x in 0..n {
            let dx = x.min(n - 1 - x);
            let dy = y.min(n - 1 - y);
            let v = ((dx * dx + dy * dy) * 3 % 200 + 20) as u8;
            img.pixel_mut(x, y).copy_from_slice(&[v, v / 2 + 40, 255 - v]);
        }
    }
    img
}

pub fn max_diff(a: &[u8], b: &[u8]) -> u8 {
    assert_eq!(a.len(), b.len(), "buffer lengths differ");
    a.iter().zip(b).map(|(&x, &y)| x.abs_diff(y)).max().unwrap_or(0)
}

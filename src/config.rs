// config.rs — Upscaler configuration.
//
// All tunables live in one serde-derived struct so a caller can keep them in
// a JSON file next to the model artifacts. Every field has a default; an
// empty JSON object is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::device::DeviceSelector;
use crate::error::{Result, UpscaleError};

/// Default tile-padding per scale, in input pixels. Large enough to cover
/// the receptive field the CUNet models crop away.
pub fn default_prepadding(scale: u32) -> usize {
    match scale {
        2 => 18,
        3 => 14,
        _ => 19,
    }
}

// ---------------------------------------------------------------------------
// NoiseLevel
// ---------------------------------------------------------------------------

/// Denoising strength the model was trained for.
///
/// Serialized as the integer level used in model file names: -1, 0, 1, 2, 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum NoiseLevel {
    /// Mild denoising that keeps texture (-1).
    Conservative,
    /// Upscale only (0).
    None,
    Denoise1x,
    Denoise2x,
    Denoise3x,
}

impl NoiseLevel {
    pub fn level(self) -> i32 {
        match self {
            NoiseLevel::Conservative => -1,
            NoiseLevel::None => 0,
            NoiseLevel::Denoise1x => 1,
            NoiseLevel::Denoise2x => 2,
            NoiseLevel::Denoise3x => 3,
        }
    }

    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            -1 => Some(NoiseLevel::Conservative),
            0 => Some(NoiseLevel::None),
            1 => Some(NoiseLevel::Denoise1x),
            2 => Some(NoiseLevel::Denoise2x),
            3 => Some(NoiseLevel::Denoise3x),
            _ => None,
        }
    }

    /// File-name stem fragment: `conservative`, `no-denoise`, `denoise2x`.
    pub fn file_stem(self) -> String {
        match self {
            NoiseLevel::Conservative => "conservative".to_string(),
            NoiseLevel::None => "no-denoise".to_string(),
            other => format!("denoise{}x", other.level()),
        }
    }
}

impl TryFrom<i32> for NoiseLevel {
    type Error = String;

    fn try_from(level: i32) -> std::result::Result<Self, Self::Error> {
        NoiseLevel::from_level(level).ok_or_else(|| format!("noise level {level} not in -1..=3"))
    }
}

impl From<NoiseLevel> for i32 {
    fn from(n: NoiseLevel) -> i32 {
        n.level()
    }
}

// ---------------------------------------------------------------------------
// SyncGap
// ---------------------------------------------------------------------------

/// How strongly per-tile channel statistics are reconciled before the
/// final pass. Stronger modes cost more but leave fewer seams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncGap {
    /// Every tile uses its own statistics.
    Off,
    /// Statistics from a 4× downscaled coordination pass.
    Weak,
    /// Statistics from a 2× downscaled pass, reconciled layer by layer.
    Moderate,
    /// Statistics from the full-resolution image run as one tile.
    Strong,
}

impl SyncGap {
    pub fn level(self) -> u32 {
        match self {
            SyncGap::Off => 0,
            SyncGap::Weak => 1,
            SyncGap::Moderate => 2,
            SyncGap::Strong => 3,
        }
    }

    pub fn from_level(level: u32) -> Option<Self> {
        match level {
            0 => Some(SyncGap::Off),
            1 => Some(SyncGap::Weak),
            2 => Some(SyncGap::Moderate),
            3 => Some(SyncGap::Strong),
            _ => None,
        }
    }

    /// Next weaker mode, used when a coordination pass does not fit.
    pub fn weaker(self) -> SyncGap {
        match self {
            SyncGap::Strong => SyncGap::Moderate,
            SyncGap::Moderate => SyncGap::Weak,
            SyncGap::Weak | SyncGap::Off => SyncGap::Off,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Upscaler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upscale factor: 2, 3 or 4. Must match the loaded model.
    pub scale: u32,
    /// Must match the loaded model.
    pub noise: NoiseLevel,
    /// Context pixels added around every tile. `None` picks the per-scale
    /// default.
    pub prepadding: Option<usize>,
    pub sync_gap: SyncGap,
    /// Tile edge in input pixels; 0 picks automatically from the memory
    /// budget.
    pub tile_size: usize,
    /// Average the eight flip/rotation variants.
    pub tta: bool,
    /// CPU worker threads; 0 uses rayon's default (one per core).
    pub threads: usize,
    pub device: DeviceSelector,
    /// Overrides the device-reported memory budget, in bytes.
    pub heap_budget: Option<u64>,
    /// Fraction of the budget a tile's working set may use.
    pub memory_headroom: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scale: 2,
            noise: NoiseLevel::Conservative,
            prepadding: None,
            sync_gap: SyncGap::Strong,
            tile_size: 0,
            tta: false,
            threads: 1,
            device: DeviceSelector::Gpu(0),
            heap_budget: None,
            memory_headroom: 0.8,
        }
    }
}

impl Config {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| UpscaleError::Config(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Prepadding actually used: the explicit value or the scale default.
    pub fn resolved_prepadding(&self) -> usize {
        self.prepadding.unwrap_or_else(|| default_prepadding(self.scale))
    }

    /// Reject configurations that can never run.
    pub fn validate(&self) -> Result<()> {
        if !(2..=4).contains(&self.scale) {
            return Err(UpscaleError::Config(format!("scale {} not in 2..=4", self.scale)));
        }
        if !(self.memory_headroom > 0.0 && self.memory_headroom <= 1.0) {
            return Err(UpscaleError::Config(format!(
                "memory headroom {} not in (0, 1]",
                self.memory_headroom
            )));
        }
        if self.heap_budget == Some(0) {
            return Err(UpscaleError::Config("heap budget override must be non-zero".into()));
        }
        let pad = self.resolved_prepadding();
        if self.tile_size != 0 && self.tile_size <= 2 * pad {
            return Err(UpscaleError::Config(format!(
                "tile size {} must exceed twice the prepadding ({})",
                self.tile_size,
                2 * pad
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.scale, 2);
        assert_eq!(c.noise, NoiseLevel::Conservative);
        assert_eq!(c.sync_gap, SyncGap::Strong);
        assert_eq!(c.device, DeviceSelector::Gpu(0));
        assert_eq!(c.resolved_prepadding(), 18);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_default_prepadding_per_scale() {
        assert_eq!(default_prepadding(2), 18);
        assert_eq!(default_prepadding(3), 14);
        assert_eq!(default_prepadding(4), 19);
    }

    #[test]
    fn test_small_tile_rejected() {
        let c = Config { tile_size: 36, ..Config::default() };
        assert!(matches!(c.validate(), Err(UpscaleError::Config(_))));
        let c = Config { tile_size: 37, ..Config::default() };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_scale_out_of_range() {
        let c = Config { scale: 5, ..Config::default() };
        assert!(matches!(c.validate(), Err(UpscaleError::Config(_))));
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let c = Config::from_json(r#"{ "scale": 4, "noise": 3, "sync_gap": "weak", "device": "cpu" }"#)
            .unwrap();
        assert_eq!(c.scale, 4);
        assert_eq!(c.noise, NoiseLevel::Denoise3x);
        assert_eq!(c.sync_gap, SyncGap::Weak);
        assert_eq!(c.device, DeviceSelector::Cpu);
        assert_eq!(c.tile_size, 0);
        assert_eq!(c.resolved_prepadding(), 19);
    }

    #[test]
    fn test_json_bad_noise() {
        assert!(matches!(
            Config::from_json(r#"{ "noise": 7 }"#),
            Err(UpscaleError::Config(_))
        ));
    }

    #[test]
    fn test_sync_gap_weaker_chain() {
        assert_eq!(SyncGap::Strong.weaker(), SyncGap::Moderate);
        assert_eq!(SyncGap::Moderate.weaker(), SyncGap::Weak);
        assert_eq!(SyncGap::Weak.weaker(), SyncGap::Off);
        assert_eq!(SyncGap::Off.weaker(), SyncGap::Off);
    }

    #[test]
    fn test_noise_file_stem() {
        assert_eq!(NoiseLevel::Conservative.file_stem(), "conservative");
        assert_eq!(NoiseLevel::None.file_stem(), "no-denoise");
        assert_eq!(NoiseLevel::Denoise2x.file_stem(), "denoise2x");
    }
}

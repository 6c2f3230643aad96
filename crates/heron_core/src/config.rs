//! Module Configuration
//!
//! Every module variant (5/8/12-band equalizer, 2-4 band crossover, ...)
//! is one concrete type built from a configuration struct. Configurations
//! load from JSON and are validated before any module is constructed.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use heron_dsp::DspError;

use crate::crossover::Crossover;
use crate::emphasis::EmphasisModule;
use crate::equalizer::Equalizer;
use crate::error::{CoreError, CoreResult};
use crate::filter::FilterModule;
use crate::module::{AudioModule, MAX_CHANNELS};
use crate::vocoder::Vocoder;

/// Most peaking bands an equalizer can carry
pub const MAX_PEAK_BANDS: usize = 16;

/// Crossover band limits
pub const MIN_CROSSOVER_BANDS: usize = 2;
pub const MAX_CROSSOVER_BANDS: usize = 4;

/// Vocoder limits
pub const MAX_VOCODER_BANDS: usize = 32;
pub const MAX_VOCODER_ORDER: usize = 8;

fn check_channels(channels: usize) -> CoreResult<()> {
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(CoreError::ChannelCount {
            got: channels,
            max: MAX_CHANNELS,
        });
    }
    Ok(())
}

fn check_bands(got: usize, min: usize, max: usize) -> CoreResult<()> {
    if got < min || got > max {
        return Err(DspError::InvalidBandCount { got, min, max }.into());
    }
    Ok(())
}

/// Single biquad filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub channels: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { channels: 2 }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> CoreResult<()> {
        check_channels(self.channels)
    }
}

/// N-band equalizer
///
/// Stages: optional high-pass and low-pass, one low shelf, one high shelf,
/// then `peak_bands` peaking bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    pub peak_bands: usize,
    pub has_hplp: bool,
    pub channels: usize,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self::five_band()
    }
}

impl EqualizerConfig {
    /// Two shelves and three peaks
    pub fn five_band() -> Self {
        Self {
            peak_bands: 3,
            has_hplp: false,
            channels: 2,
        }
    }

    /// High-pass, low-pass, two shelves and four peaks
    pub fn eight_band() -> Self {
        Self {
            peak_bands: 4,
            has_hplp: true,
            channels: 2,
        }
    }

    /// High-pass, low-pass, two shelves and eight peaks
    pub fn twelve_band() -> Self {
        Self {
            peak_bands: 8,
            has_hplp: true,
            channels: 2,
        }
    }

    /// Total number of filter stages
    pub fn stage_count(&self) -> usize {
        self.peak_bands + 2 + if self.has_hplp { 2 } else { 0 }
    }

    pub fn validate(&self) -> CoreResult<()> {
        check_channels(self.channels)?;
        check_bands(self.peak_bands, 1, MAX_PEAK_BANDS)
    }
}

/// Band-splitting crossover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    pub bands: usize,
    pub channels: usize,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self::three_band()
    }
}

impl CrossoverConfig {
    pub fn two_band() -> Self {
        Self {
            bands: 2,
            channels: 2,
        }
    }

    pub fn three_band() -> Self {
        Self {
            bands: 3,
            channels: 2,
        }
    }

    pub fn four_band() -> Self {
        Self {
            bands: 4,
            channels: 2,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        check_channels(self.channels)?;
        check_bands(self.bands, MIN_CROSSOVER_BANDS, MAX_CROSSOVER_BANDS)?;
        // Every band needs its own output pair
        check_channels(self.bands * self.channels).map_err(|_| {
            CoreError::Config(format!(
                "{} bands of {} channels exceed {} outputs",
                self.bands, self.channels, MAX_CHANNELS
            ))
        })
    }
}

/// Stereo channel vocoder
///
/// Buffers are sized for `max_bands` bands of `max_order` sections; the
/// band count and order parameters move freely below those limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocoderConfig {
    pub max_bands: usize,
    pub max_order: usize,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            max_bands: MAX_VOCODER_BANDS,
            max_order: MAX_VOCODER_ORDER,
        }
    }
}

impl VocoderConfig {
    pub fn validate(&self) -> CoreResult<()> {
        check_bands(self.max_bands, 4, MAX_VOCODER_BANDS)?;
        if self.max_order == 0 || self.max_order > MAX_VOCODER_ORDER {
            return Err(CoreError::Config(format!(
                "Vocoder order {} (must be 1-{})",
                self.max_order, MAX_VOCODER_ORDER
            )));
        }
        Ok(())
    }
}

/// Record/playback emphasis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmphasisConfig {
    pub channels: usize,
}

impl Default for EmphasisConfig {
    fn default() -> Self {
        Self { channels: 2 }
    }
}

impl EmphasisConfig {
    pub fn validate(&self) -> CoreResult<()> {
        check_channels(self.channels)
    }
}

/// Any module, tagged by `kind`
///
/// ```json
/// { "kind": "equalizer", "peak_bands": 8, "has_hplp": true, "channels": 2 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleConfig {
    Filter(FilterConfig),
    Equalizer(EqualizerConfig),
    Crossover(CrossoverConfig),
    Vocoder(VocoderConfig),
    Emphasis(EmphasisConfig),
}

impl ModuleConfig {
    pub fn validate(&self) -> CoreResult<()> {
        let result = match self {
            ModuleConfig::Filter(c) => c.validate(),
            ModuleConfig::Equalizer(c) => c.validate(),
            ModuleConfig::Crossover(c) => c.validate(),
            ModuleConfig::Vocoder(c) => c.validate(),
            ModuleConfig::Emphasis(c) => c.validate(),
        };
        if let Err(e) = &result {
            warn!("Rejected {} config: {}", self.kind_name(), e);
        }
        result
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: ModuleConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModuleConfig::Filter(_) => "filter",
            ModuleConfig::Equalizer(_) => "equalizer",
            ModuleConfig::Crossover(_) => "crossover",
            ModuleConfig::Vocoder(_) => "vocoder",
            ModuleConfig::Emphasis(_) => "emphasis",
        }
    }
}

/// Construct the module a configuration describes
///
/// The module still needs `set_sample_rate()` and `activate()` before use.
pub fn build_module(config: &ModuleConfig) -> CoreResult<Box<dyn AudioModule>> {
    config.validate()?;
    info!("Building {} module", config.kind_name());
    let module: Box<dyn AudioModule> = match *config {
        ModuleConfig::Filter(c) => Box::new(FilterModule::biquad(c.channels)?),
        ModuleConfig::Equalizer(c) => Box::new(Equalizer::new(c)?),
        ModuleConfig::Crossover(c) => Box::new(Crossover::new(c)?),
        ModuleConfig::Vocoder(c) => Box::new(Vocoder::new(c)?),
        ModuleConfig::Emphasis(c) => Box::new(EmphasisModule::new(c)?),
    };
    Ok(module)
}

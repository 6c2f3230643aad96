//! Heron Core - Audio Effect Modules
//!
//! The effect modules built on `heron_dsp`:
//! - Single filter with 12 response modes and smoothed parameters
//! - N-band parametric equalizer (5/8/12 band presets)
//! - Linkwitz-Riley crossover with per-band delay
//! - Channel vocoder
//! - Record/playback emphasis
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  Host / UI thread                         │
//! │   ParamBank::set() ──▶ params_changed()   LineGraph ◀──┐  │
//! └───────────────────────────────────────────────────────────┘
//!                  │ relaxed atomics                          │
//!                  ▼                                          │
//! ┌───────────────────────────────────────────────────────────┐
//! │                     Audio thread                          │
//! │   process() ──▶ ramps ──▶ coefficients ──▶ publish ───────┘
//! │        (no allocation, no locks, no errors)               │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Modules are built from a [`ModuleConfig`], which loads from JSON.

mod config;
mod crossover;
mod emphasis;
mod equalizer;
mod error;
mod filter;
mod meters;
mod module;
mod params;
mod vocoder;

pub use config::{
    build_module, CrossoverConfig, EmphasisConfig, EqualizerConfig, FilterConfig, ModuleConfig,
    VocoderConfig, MAX_CROSSOVER_BANDS, MAX_PEAK_BANDS, MAX_VOCODER_BANDS, MAX_VOCODER_ORDER,
    MIN_CROSSOVER_BANDS,
};
pub use crossover::{Crossover, CrossoverMode, XoverGraph, XoverLayout, MAX_DELAY_MS};
pub use emphasis::{EmphasisGraph, EmphasisLayout, EmphasisModule};
pub use equalizer::{EqGraph, EqLayout, Equalizer, StageId, StageSlots};
pub use error::{CoreError, CoreResult};
pub use filter::{BiquadFilter, FilterFamily, FilterGraph, FilterKind, FilterLayout, FilterMode, FilterModule};
pub use meters::{MeterBank, MeterSlot};
pub use module::{channel_mask, run_block, AudioModule, MAX_CHANNELS};
pub use params::{ParamBank, ParamSpec};
pub use vocoder::{band_frequency, band_q, Vocoder, VocoderGraph, VocoderLayout, BAND_CHOICES};

// Re-export the graph surface for hosts that draw responses
pub use heron_dsp::{FrequencyResponse, GraphGeneration, Gridline, LineGraph};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _config = ModuleConfig::Filter(FilterConfig::default());
        let filter = FilterModule::biquad(2).unwrap();
        assert_eq!(filter.name(), "filter");
        assert!(filter.line_graph().is_some());
    }
}

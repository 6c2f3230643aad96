//! Channel Vocoder
//!
//! Two band-pass banks per channel over the same band layout:
//!
//! ```text
//! modulator ─▶ detector band k ─▶ |·| ─▶ attack/release ─▶ env[k] ──┐
//!                                                                   ▼
//! carrier ───▶ synthesis band k ─────────────────────────────────▶ × ─▶ level/pan ─▶ Σ ─▶ out
//! ```
//!
//! Band centers are log spaced over 20 Hz - 20 kHz. The order parameter is
//! fractional: its integer part is the number of cascaded sections per band,
//! its fraction sharpens the sections' Q.
//!
//! Filter and envelope storage is sized once for the configured maximum
//! band count and order; changing either at run time only re-targets
//! coefficients and clears the state of newly engaged sections.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use heron_dsp::biquad::{clamp_frequency, coefficients, response, AtomicCoefficients, BiquadStage, Shape};
use heron_dsp::bypass::DEFAULT_BYPASS_TIME;
use heron_dsp::graph::{response_gridline, sample_curve, GainScale};
use heron_dsp::{
    Bypass, DspError, EnvelopeFollower, FrequencyResponse, GraphGeneration, Gridline, LineGraph,
    SpectrumAnalyzer,
};
use tracing::{debug, info};

use crate::config::{VocoderConfig, MAX_VOCODER_BANDS};
use crate::error::CoreResult;
use crate::meters::{MeterBank, MeterSlot};
use crate::module::{crossfade, AudioModule};
use crate::params::{ParamBank, ParamSpec};

/// Band count choices of the `bands` parameter
pub const BAND_CHOICES: [usize; 4] = [4, 8, 16, 32];

const LOWEST_FREQ: f32 = 20.0;
/// Ratio between the highest and lowest band edge
const SPAN: f32 = 1000.0;

/// Input ports
pub const CARRIER_L: usize = 0;
pub const CARRIER_R: usize = 1;
pub const MOD_L: usize = 2;
pub const MOD_R: usize = 3;

/// Center frequency of band `band` out of `bands`
pub fn band_frequency(band: usize, bands: usize) -> f32 {
    LOWEST_FREQ * SPAN.powf((band as f32 + 0.5) / bands as f32)
}

/// Section Q for `bands` bands, sharpened by the fractional order part
pub fn band_q(bands: usize, order_fraction: f32) -> f32 {
    let octaves = SPAN.log2() / bands as f32;
    let ratio = 2.0_f32.powf(octaves);
    ratio.sqrt() / (ratio - 1.0) * (1.0 + order_fraction)
}

/// Parameter indices of a vocoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocoderLayout {
    pub max_bands: usize,
    pub max_order: usize,
}

impl VocoderLayout {
    pub const BYPASS: usize = 0;
    pub const CARRIER_IN: usize = 1;
    pub const MOD_IN: usize = 2;
    pub const OUT: usize = 3;
    pub const DRY_CARRIER: usize = 4;
    pub const DRY_MOD: usize = 5;
    pub const BANDS: usize = 6;
    pub const ORDER: usize = 7;
    pub const ATTACK: usize = 8;
    pub const RELEASE: usize = 9;
    pub const LINK: usize = 10;
    pub const ANALYZER: usize = 11;
    pub const SOLO: usize = 12;
    const FIXED: usize = 13;

    pub fn band_level(&self, band: usize) -> usize {
        Self::FIXED + band * 2
    }

    pub fn band_pan(&self, band: usize) -> usize {
        Self::FIXED + band * 2 + 1
    }

    fn meter_base(&self) -> usize {
        Self::FIXED + self.max_bands * 2
    }

    /// Meter of input port `port` (carrier L/R, modulator L/R)
    pub fn meter_in(&self, port: usize) -> usize {
        self.meter_base() + port * 2
    }

    pub fn meter_out(&self, channel: usize) -> usize {
        self.meter_base() + 8 + channel * 2
    }

    /// Value of the `bands` parameter for a band count
    pub fn bands_choice(bands: usize) -> f32 {
        BAND_CHOICES
            .iter()
            .position(|&b| b >= bands)
            .unwrap_or(BAND_CHOICES.len() - 1) as f32
    }

    pub fn specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec::toggle("bypass", false),
            ParamSpec::new("carrier_in", 1.0, 0.0, 64.0),
            ParamSpec::new("mod_in", 1.0, 0.0, 64.0),
            ParamSpec::new("out", 1.0, 0.0, 64.0),
            ParamSpec::new("dry_carrier", 0.0, 0.0, 64.0),
            ParamSpec::new("dry_mod", 0.0, 0.0, 64.0),
            ParamSpec::new("bands", Self::bands_choice(16.min(self.max_bands)), 0.0, Self::bands_choice(self.max_bands)),
            ParamSpec::new("order", 3.0_f32.min(self.max_order as f32), 1.0, self.max_order as f32),
            ParamSpec::new("attack", 5.0, 0.1, 500.0),
            ParamSpec::new("release", 50.0, 0.1, 2000.0),
            ParamSpec::toggle("link", false),
            ParamSpec::toggle("analyzer", false),
            ParamSpec::new("solo", -1.0, -1.0, (self.max_bands - 1) as f32),
        ];
        for b in 0..self.max_bands {
            specs.push(ParamSpec::new(format!("level{}", b + 1), 1.0, 0.0, 4.0));
            specs.push(ParamSpec::new(format!("pan{}", b + 1), 0.0, -1.0, 1.0));
        }
        for name in ["carrier_in_l", "carrier_in_r", "mod_in_l", "mod_in_r", "out_l", "out_r"] {
            specs.push(ParamSpec::output(format!("meter_{}", name)));
            specs.push(ParamSpec::output(format!("clip_{}", name)));
        }
        specs
    }

    fn meter_slots(&self) -> Vec<MeterSlot> {
        (0..4)
            .map(|port| self.meter_in(port))
            .chain((0..2).map(|ch| self.meter_out(ch)))
            .map(|level| MeterSlot::new(level, Some(level + 1)))
            .collect()
    }
}

/// Band sections of one channel, `max_bands * max_order` long
#[derive(Debug, Clone)]
struct FilterBank {
    stages: Vec<BiquadStage>,
    max_order: usize,
}

impl FilterBank {
    fn new(max_bands: usize, max_order: usize) -> Self {
        Self {
            stages: vec![BiquadStage::new(); max_bands * max_order],
            max_order,
        }
    }

    fn band_mut(&mut self, band: usize) -> &mut [BiquadStage] {
        let start = band * self.max_order;
        &mut self.stages[start..start + self.max_order]
    }

    /// Run `x` through the first `order` sections of `band`
    #[inline]
    fn process(&mut self, band: usize, order: usize, x: f32) -> f32 {
        self.band_mut(band)[..order]
            .iter_mut()
            .fold(x, |acc, stage| stage.process(acc))
    }

    fn reset(&mut self) {
        self.stages.iter_mut().for_each(BiquadStage::reset);
    }
}

/// Committed band sections for the UI thread
#[derive(Debug)]
pub struct VocoderGraph {
    params: Arc<ParamBank>,
    layout: VocoderLayout,
    sections: Vec<AtomicCoefficients>,
    bands: AtomicUsize,
    order: AtomicUsize,
    sample_rate: AtomicU32,
    generation: GraphGeneration,
    analyzer: SpectrumAnalyzer,
}

impl VocoderGraph {
    /// Band filter magnitude at `freq`, before level
    pub fn band_response(&self, band: usize, freq: f32) -> Result<f32, DspError> {
        let bands = self.bands.load(Ordering::Relaxed);
        let section = self
            .sections
            .get(band)
            .filter(|_| band < bands)
            .ok_or(DspError::InvalidBandIndex { index: band, count: bands })?;
        let sample_rate = self.sample_rate.load(Ordering::Relaxed) as f32;
        let order = self.order.load(Ordering::Relaxed) as i32;
        Ok((response(&section.load(), freq, sample_rate).norm() as f32).powi(order))
    }

    pub fn generation(&self) -> &GraphGeneration {
        &self.generation
    }

    pub fn analyzer(&self) -> &SpectrumAnalyzer {
        &self.analyzer
    }
}

impl FrequencyResponse for VocoderGraph {
    fn freq_gain(&self, subindex: usize, freq: f32) -> f32 {
        self.band_response(subindex, freq)
            .map_or(0.0, |g| g * self.params.get(self.layout.band_level(subindex)))
    }
}

impl LineGraph for VocoderGraph {
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool {
        if index != 0 {
            return false;
        }
        if phase {
            return subindex == 0
                && self.params.get_bool(VocoderLayout::ANALYZER)
                && self
                    .analyzer
                    .fill_graph(data, |m| GainScale::Default.position(m));
        }
        if subindex >= self.bands.load(Ordering::Relaxed) {
            return false;
        }
        sample_curve(
            data,
            |f| self.freq_gain(subindex, f).max(1.0e-9),
            |g| GainScale::Default.position(g),
        );
        true
    }

    fn get_gridline(&self, index: usize, subindex: usize, phase: bool) -> Option<Gridline> {
        if index != 0 || phase {
            return None;
        }
        response_gridline(subindex, GainScale::Default)
    }

    fn get_layers(&self, index: usize, generation: u32) -> Option<u32> {
        if index != 0 {
            return None;
        }
        let analyzer = self.params.get_bool(VocoderLayout::ANALYZER);
        if analyzer {
            self.analyzer.update();
        }
        self.generation.layers(generation, analyzer)
    }
}

/// Stereo channel vocoder
pub struct Vocoder {
    layout: VocoderLayout,
    params: Arc<ParamBank>,
    graph: Arc<VocoderGraph>,
    detector: [FilterBank; 2],
    synthesis: [FilterBank; 2],
    envelopes: [Vec<EnvelopeFollower>; 2],
    bands: usize,
    order: usize,
    order_old: f32,
    attack_old: f32,
    release_old: f32,
    bypass: Bypass,
    meters: MeterBank,
    sample_rate: u32,
    is_active: bool,
}

impl Vocoder {
    pub fn new(config: VocoderConfig) -> CoreResult<Self> {
        config.validate()?;
        let layout = VocoderLayout {
            max_bands: config.max_bands,
            max_order: config.max_order,
        };
        let params = Arc::new(ParamBank::new(layout.specs()));
        let graph = Arc::new(VocoderGraph {
            params: Arc::clone(&params),
            layout,
            sections: (0..layout.max_bands).map(|_| AtomicCoefficients::default()).collect(),
            bands: AtomicUsize::new(0),
            order: AtomicUsize::new(1),
            sample_rate: AtomicU32::new(48000),
            generation: GraphGeneration::new(),
            analyzer: SpectrumAnalyzer::new(48000, heron_dsp::analyzer::DEFAULT_FPS),
        });
        let bank = FilterBank::new(layout.max_bands, layout.max_order);
        let mut vocoder = Self {
            layout,
            params,
            graph,
            detector: [bank.clone(), bank.clone()],
            synthesis: [bank.clone(), bank],
            envelopes: [
                vec![EnvelopeFollower::new(); layout.max_bands],
                vec![EnvelopeFollower::new(); layout.max_bands],
            ],
            bands: 0,
            order: 0,
            order_old: 0.0,
            attack_old: 0.0,
            release_old: 0.0,
            bypass: Bypass::new(),
            meters: MeterBank::new(layout.meter_slots()),
            sample_rate: 48000,
            is_active: false,
        };
        vocoder.set_sample_rate(48000);
        Ok(vocoder)
    }

    pub fn layout(&self) -> VocoderLayout {
        self.layout
    }

    pub fn graph(&self) -> &Arc<VocoderGraph> {
        &self.graph
    }

    /// Bands taking part in synthesis
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Cascaded sections per band
    pub fn order(&self) -> usize {
        self.order
    }

    /// The soloed band, if any
    pub fn get_solo(&self) -> Option<usize> {
        let solo = self.params.get(VocoderLayout::SOLO).round();
        if solo < 0.0 {
            return None;
        }
        Some(solo as usize).filter(|&band| band < self.bands)
    }

    /// Detector envelope of `band` on `channel`
    pub fn envelope(&self, channel: usize, band: usize) -> f32 {
        self.envelopes
            .get(channel)
            .and_then(|e| e.get(band))
            .map_or(0.0, EnvelopeFollower::envelope)
    }

    fn requested_bands(&self) -> usize {
        let choice = self.params.get_index(VocoderLayout::BANDS);
        BAND_CHOICES[choice.min(BAND_CHOICES.len() - 1)].min(self.layout.max_bands)
    }

    /// Retarget band sections after a band count or order change
    fn calculate_bands(&mut self, bands: usize, order_param: f32) {
        let order = (order_param.floor() as usize).clamp(1, self.layout.max_order);
        let fraction = order_param - order_param.floor();
        let sample_rate = self.sample_rate as f32;
        let q = band_q(bands, fraction);

        for band in 0..bands {
            let freq = clamp_frequency(band_frequency(band, bands), sample_rate);
            let Ok(coeffs) = coefficients(Shape::BandPass, freq, q, sample_rate) else {
                continue;
            };
            for bank in self.detector.iter_mut().chain(self.synthesis.iter_mut()) {
                let stages = bank.band_mut(band);
                for stage in stages.iter_mut() {
                    stage.set_coefficients(coeffs);
                }
                // Sections joining the chain start from silence
                let engaged = if band < self.bands { self.order.min(order) } else { 0 };
                stages[engaged..order].iter_mut().for_each(BiquadStage::reset);
            }
            self.graph.sections[band].store(&coeffs);
        }
        for envelopes in &mut self.envelopes {
            envelopes[self.bands.min(bands)..bands]
                .iter_mut()
                .for_each(EnvelopeFollower::reset);
        }

        if bands != self.bands || order != self.order {
            debug!(bands, order, "Vocoder bands changed");
        }
        self.bands = bands;
        self.order = order;
        self.graph.bands.store(bands, Ordering::Relaxed);
        self.graph.order.store(order, Ordering::Relaxed);
        let generation = self.graph.generation.bump();
        self.graph.generation.mark_calculated(generation);
    }

    fn set_envelope_times(&mut self) {
        let attack = self.params.get(VocoderLayout::ATTACK);
        let release = self.params.get(VocoderLayout::RELEASE);
        if attack == self.attack_old && release == self.release_old {
            return;
        }
        self.attack_old = attack;
        self.release_old = release;
        let sample_rate = self.sample_rate as f32;
        for follower in self.envelopes.iter_mut().flatten() {
            follower.set_times(attack, release, sample_rate);
        }
    }
}

impl AudioModule for Vocoder {
    fn name(&self) -> &'static str {
        "vocoder"
    }

    fn params(&self) -> &Arc<ParamBank> {
        &self.params
    }

    fn input_count(&self) -> usize {
        4
    }

    fn output_count(&self) -> usize {
        2
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        debug_assert!(sample_rate > 0, "sample rate must be positive");
        self.sample_rate = sample_rate;
        self.graph.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.graph.analyzer.set_sample_rate(sample_rate);
        self.bypass.init(sample_rate, DEFAULT_BYPASS_TIME);
        self.meters.set_sample_rate(sample_rate);
        // Force every rate-dependent value to be recomputed
        self.attack_old = 0.0;
        self.order_old = 0.0;
        debug!(sample_rate, "Vocoder sample rate set");
    }

    fn activate(&mut self) {
        info!(sample_rate = self.sample_rate, "Activating vocoder");
        for bank in self.detector.iter_mut().chain(self.synthesis.iter_mut()) {
            bank.reset();
        }
        for follower in self.envelopes.iter_mut().flatten() {
            follower.reset();
        }
        self.bands = 0;
        self.order_old = 0.0;
        self.bypass.set_now(self.params.get_bool(VocoderLayout::BYPASS));
        self.params_changed();
        self.graph.analyzer.reset();
        self.meters.reset();
        self.is_active = true;
    }

    fn deactivate(&mut self) {
        info!("Deactivating vocoder");
        self.is_active = false;
    }

    fn params_changed(&mut self) {
        let bands = self.requested_bands();
        let order = self.params.get(VocoderLayout::ORDER);
        if bands != self.bands || order != self.order_old {
            self.order_old = order;
            self.calculate_bands(bands, order);
        }
        self.set_envelope_times();
        self.bypass.set_bypass(self.params.get_bool(VocoderLayout::BYPASS));
    }

    fn process(
        &mut self,
        ins: &[&[f32]],
        outs: &mut [&mut [f32]],
        offset: usize,
        numsamples: usize,
        inputs_mask: u32,
        outputs_mask: u32,
    ) -> u32 {
        let end = offset + numsamples;
        let input = |port: usize, i: usize| match ins.get(port) {
            Some(buf) if inputs_mask & (1 << port) != 0 => buf[i],
            _ => 0.0,
        };

        if !self.is_active || self.bypass.is_bypassed() {
            for (ch, out) in outs.iter_mut().enumerate().take(2) {
                if outputs_mask & (1 << ch) != 0 {
                    for i in offset..end {
                        out[i] = input(CARRIER_L + ch, i);
                    }
                }
            }
            return outputs_mask & 0b11;
        }

        let carrier_in = self.params.get(VocoderLayout::CARRIER_IN);
        let mod_in = self.params.get(VocoderLayout::MOD_IN);
        let out_gain = self.params.get(VocoderLayout::OUT);
        let dry_carrier = self.params.get(VocoderLayout::DRY_CARRIER);
        let dry_mod = self.params.get(VocoderLayout::DRY_MOD);
        let link = self.params.get_bool(VocoderLayout::LINK);
        let solo = self.get_solo();
        let analyzer = self.params.get_bool(VocoderLayout::ANALYZER);
        let (bands, order) = (self.bands, self.order);

        // Per-band level with pan law, left then right
        let mut band_gain = [[0.0_f32; 2]; MAX_VOCODER_BANDS];
        for (band, gain) in band_gain.iter_mut().enumerate().take(bands) {
            let level = self.params.get(self.layout.band_level(band));
            let pan = self.params.get(self.layout.band_pan(band));
            *gain = [level * (1.0 - pan).min(1.0), level * (1.0 + pan).min(1.0)];
        }

        for i in offset..end {
            let carrier = [input(CARRIER_L, i) * carrier_in, input(CARRIER_R, i) * carrier_in];
            let modulator = [input(MOD_L, i) * mod_in, input(MOD_R, i) * mod_in];
            for (port, &x) in carrier.iter().chain(&modulator).enumerate() {
                self.meters.update(port, x);
            }

            let mut wet = [0.0_f32; 2];
            for band in 0..bands {
                let detected = [
                    self.detector[0].process(band, order, modulator[0]),
                    self.detector[1].process(band, order, modulator[1]),
                ];
                let envelope = if link {
                    let level = detected[0].abs().max(detected[1].abs());
                    [
                        self.envelopes[0][band].process(level),
                        self.envelopes[1][band].process(level),
                    ]
                } else {
                    [
                        self.envelopes[0][band].process(detected[0]),
                        self.envelopes[1][band].process(detected[1]),
                    ]
                };
                let shaped = [
                    self.synthesis[0].process(band, order, carrier[0]) * envelope[0],
                    self.synthesis[1].process(band, order, carrier[1]) * envelope[1],
                ];
                if solo.map_or(false, |s| s != band) {
                    continue;
                }
                wet[0] += shaped[0] * band_gain[band][0];
                wet[1] += shaped[1] * band_gain[band][1];
            }

            let mixed = [
                (wet[0] + carrier[0] * dry_carrier + modulator[0] * dry_mod) * out_gain,
                (wet[1] + carrier[1] * dry_carrier + modulator[1] * dry_mod) * out_gain,
            ];
            for (ch, out) in outs.iter_mut().enumerate().take(2) {
                if outputs_mask & (1 << ch) != 0 {
                    out[i] = mixed[ch];
                }
                self.meters.update(4 + ch, mixed[ch]);
            }
            if analyzer {
                self.graph.analyzer.push_sample(mixed[0], mixed[1]);
            }
        }

        crossfade(&mut self.bypass, ins, outs, offset, end, inputs_mask, outputs_mask);
        self.meters.fall(numsamples as u32);
        self.meters.publish(&self.params);
        outputs_mask & 0b11
    }

    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        Some(Arc::clone(&self.graph) as Arc<dyn LineGraph>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48000;

    fn active_vocoder() -> Vocoder {
        let mut vocoder = Vocoder::new(VocoderConfig::default()).unwrap();
        vocoder.set_sample_rate(SR);
        vocoder.activate();
        vocoder
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn run(vocoder: &mut Vocoder, carrier: &[f32], modulator: &[f32]) -> Vec<f32> {
        let mut out_l = vec![0.0; carrier.len()];
        let mut out_r = vec![0.0; carrier.len()];
        {
            let ins: [&[f32]; 4] = [carrier, carrier, modulator, modulator];
            let mut outs: [&mut [f32]; 2] = [&mut out_l, &mut out_r];
            vocoder.process(&ins, &mut outs, 0, carrier.len(), 0b1111, 0b11);
        }
        out_l
    }

    #[test]
    fn test_band_layout() {
        assert!((band_frequency(0, 4) - 20.0 * 1000.0_f32.powf(0.125)).abs() < 1e-2);
        assert!(band_frequency(31, 32) < 20000.0);
        assert!(band_q(32, 0.0) > band_q(4, 0.0));
        assert!(band_q(8, 0.5) > band_q(8, 0.0));
        assert_eq!(VocoderLayout::bands_choice(16), 2.0);
    }

    #[test]
    fn test_defaults() {
        let vocoder = active_vocoder();
        assert_eq!(vocoder.bands(), 16);
        assert_eq!(vocoder.order(), 3);
        assert_eq!(vocoder.get_solo(), None);
        assert_eq!(vocoder.input_count(), 4);
    }

    #[test]
    fn test_silent_modulator_mutes_carrier() {
        let mut vocoder = active_vocoder();
        let carrier = sine(440.0, 4800);
        let out = run(&mut vocoder, &carrier, &vec![0.0; 4800]);
        assert!(out.iter().all(|&s| s == 0.0));

        vocoder.params().set(VocoderLayout::DRY_CARRIER, 1.0);
        vocoder.params_changed();
        let out = run(&mut vocoder, &carrier, &vec![0.0; 4800]);
        assert_eq!(out, carrier);
    }

    #[test]
    fn test_modulator_opens_matching_band() {
        let mut vocoder = active_vocoder();
        let band = 8;
        let freq = band_frequency(band, 16);
        let noise: Vec<f32> = (0..9600).map(|i| ((i * 7919 % 211) as f32 / 105.0) - 1.0).collect();
        let out = run(&mut vocoder, &noise, &sine(freq, 9600));
        assert!(out[4800..].iter().any(|s| s.abs() > 1.0e-3));

        let open = vocoder.envelope(0, band);
        assert!(open > 0.1, "envelope {}", open);
        assert!(vocoder.envelope(0, 0) < open * 0.01);
        assert!(vocoder.envelope(0, 15) < open * 0.01);
    }

    #[test]
    fn test_solo_selects_band() {
        let mut vocoder = active_vocoder();
        let freq = band_frequency(8, 16);
        let noise: Vec<f32> = (0..4800).map(|i| ((i * 7919 % 211) as f32 / 105.0) - 1.0).collect();
        let modulator = sine(freq, 4800);

        vocoder.params().set(VocoderLayout::SOLO, 2.0);
        vocoder.params_changed();
        assert_eq!(vocoder.get_solo(), Some(2));
        let soloed = run(&mut vocoder, &noise, &modulator);

        let mut reference = active_vocoder();
        let full = run(&mut reference, &noise, &modulator);
        let energy = |v: &[f32]| v.iter().map(|s| s * s).sum::<f32>();
        assert!(energy(&soloed) < energy(&full) * 0.01);
    }

    #[test]
    fn test_band_pan_and_level() {
        let freq = band_frequency(8, 16);
        let noise: Vec<f32> = (0..4800).map(|i| ((i * 7919 % 211) as f32 / 105.0) - 1.0).collect();
        let modulator = sine(freq, 4800);
        let render = |vocoder: &mut Vocoder| {
            let mut out_l = vec![0.0; noise.len()];
            let mut out_r = vec![0.0; noise.len()];
            {
                let ins: [&[f32]; 4] = [&noise, &noise, &modulator, &modulator];
                let mut outs: [&mut [f32]; 2] = [&mut out_l, &mut out_r];
                vocoder.process(&ins, &mut outs, 0, noise.len(), 0b1111, 0b11);
            }
            (out_l, out_r)
        };
        let energy = |v: &[f32]| v.iter().map(|s| s * s).sum::<f32>();

        let mut centered = active_vocoder();
        let (left, right) = render(&mut centered);
        assert!(energy(&left) > 0.0);
        assert!((energy(&left) - energy(&right)).abs() < energy(&left) * 1e-3);

        // Hard right pan silences every band on the left
        let mut panned = active_vocoder();
        for band in 0..panned.bands() {
            panned.params().set(panned.layout.band_pan(band), 1.0);
        }
        panned.params_changed();
        let (left, right) = render(&mut panned);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!((energy(&right) - energy(&render(&mut active_vocoder()).1)).abs() < 1e-3 * energy(&right));

        let mut doubled = active_vocoder();
        for band in 0..doubled.bands() {
            doubled.params().set(doubled.layout.band_level(band), 2.0);
        }
        doubled.params_changed();
        let (left, _) = render(&mut doubled);
        let ratio = energy(&left) / energy(&render(&mut active_vocoder()).0);
        assert!((ratio - 4.0).abs() < 0.01, "energy ratio {}", ratio);
    }

    #[test]
    fn test_analyzer_advances_per_frame() {
        let mut vocoder = active_vocoder();
        vocoder.params().set(VocoderLayout::ANALYZER, 1.0);
        vocoder.params().set(VocoderLayout::DRY_CARRIER, 1.0);
        vocoder.params_changed();
        run(&mut vocoder, &sine(1000.0, 8192), &vec![0.0; 8192]);

        let graph = vocoder.line_graph().unwrap();
        let mut data = [0.0; 64];
        assert!(!graph.get_graph(0, 0, true, &mut data));
        let layers = graph.get_layers(0, 3).unwrap_or(0);
        assert_ne!(layers & heron_dsp::LAYER_REALTIME_GRAPH, 0);
        assert!(graph.get_graph(0, 0, true, &mut data));
        assert!(!vocoder.graph().analyzer().update(), "frame already taken");
    }

    #[test]
    fn test_band_change_keeps_storage() {
        let mut vocoder = active_vocoder();
        let before = vocoder.detector[0].stages.as_ptr();
        vocoder.params().set(VocoderLayout::BANDS, 3.0);
        vocoder.params().set(VocoderLayout::ORDER, 5.5);
        vocoder.params_changed();
        assert_eq!(vocoder.bands(), 32);
        assert_eq!(vocoder.order(), 5);
        assert_eq!(vocoder.detector[0].stages.as_ptr(), before);

        let graph = vocoder.line_graph().unwrap();
        let mut data = [0.0; 32];
        assert!(graph.get_graph(0, 31, false, &mut data));
        assert!(!graph.get_graph(0, 32, false, &mut data));
        assert!(vocoder.graph().band_response(32, 1000.0).is_err());
        let center = band_frequency(10, 32);
        let peak = vocoder.graph().band_response(10, center).unwrap();
        assert!((peak - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_bypass_passes_carrier() {
        let mut vocoder = active_vocoder();
        vocoder.params().set(VocoderLayout::BYPASS, 1.0);
        vocoder.activate();
        let carrier = sine(300.0, 256);
        assert_eq!(run(&mut vocoder, &carrier, &sine(1000.0, 256)), carrier);
    }
}

//! Crossover
//!
//! Splits each input channel into 2-4 adjacent bands with Linkwitz-Riley
//! filter pairs arranged as a tree:
//!
//! ```text
//! x ──┬─ LP0 ─ AP1 ─ AP2 ──▶ band 0
//!     └─ HP0 ─┬─ LP1 ─ AP2 ─▶ band 1
//!             └─ HP1 ─┬─ LP2 ▶ band 2
//!                     └─ HP2 ▶ band 3
//! ```
//!
//! `LPk + HPk` of a Linkwitz-Riley pair is an all-pass `APk`, so running the
//! lower bands through the all-passes of every higher split makes the band
//! sum an all-pass of the input: flat magnitude, phase shifted. LR2 needs
//! its high-pass inverted for this to hold.
//!
//! After the split each band gets a level, a mute, a phase switch and a
//! delay taken from one interleaved ring buffer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use biquad::Coefficients;
use heron_dsp::biquad::{
    clamp_frequency, coefficients, first_order_allpass, identity, Cascade, CascadeSnapshot, Shape,
    MAX_CASCADE,
};
use heron_dsp::graph::{response_gridline, sample_curve, GainScale};
use heron_dsp::{DspError, FrequencyResponse, GraphGeneration, Gridline, LineGraph};
use tracing::{debug, info};

use crate::config::{CrossoverConfig, MAX_CROSSOVER_BANDS};
use crate::error::CoreResult;
use crate::meters::{MeterBank, MeterSlot};
use crate::module::{channel_mask, AudioModule};
use crate::params::{ParamBank, ParamSpec};

const MAX_SPLITS: usize = MAX_CROSSOVER_BANDS - 1;

/// Longest band delay in milliseconds
pub const MAX_DELAY_MS: f32 = 100.0;

/// Butterworth 4th order section Qs
const BW4_Q: [f32; 2] = [0.541_196_1, 1.306_563];

/// Section Qs of each Linkwitz-Riley low/high-pass; one Q = 0.5 section is
/// the square of a first order Butterworth
const LR2_Q: [f32; 1] = [0.5];
const LR4_Q: [f32; 2] = [std::f32::consts::FRAC_1_SQRT_2; 2];
const LR8_Q: [f32; 4] = [BW4_Q[0], BW4_Q[1], BW4_Q[0], BW4_Q[1]];

/// Linkwitz-Riley slope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossoverMode {
    /// 12 dB/oct
    Lr2,
    /// 24 dB/oct
    Lr4,
    /// 48 dB/oct
    Lr8,
}

impl CrossoverMode {
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => CrossoverMode::Lr2,
            1 => CrossoverMode::Lr4,
            _ => CrossoverMode::Lr8,
        }
    }

    /// Sign applied to the high-pass branch
    fn hp_sign(self) -> f32 {
        match self {
            CrossoverMode::Lr2 => -1.0,
            _ => 1.0,
        }
    }
}

/// Sections of one split point
#[derive(Debug, Clone, Copy)]
struct SplitDesign {
    lp: [Coefficients<f32>; MAX_CASCADE],
    hp: [Coefficients<f32>; MAX_CASCADE],
    ap: [Coefficients<f32>; 2],
    sections: usize,
    ap_sections: usize,
}

impl SplitDesign {
    fn new(mode: CrossoverMode, freq: f32, sample_rate: f32) -> Result<Self, DspError> {
        let freq = clamp_frequency(freq, sample_rate);
        let mut design = Self {
            lp: [identity(); MAX_CASCADE],
            hp: [identity(); MAX_CASCADE],
            ap: [identity(); 2],
            sections: 0,
            ap_sections: 0,
        };
        let qs: &[f32] = match mode {
            CrossoverMode::Lr2 => &LR2_Q,
            CrossoverMode::Lr4 => &LR4_Q,
            CrossoverMode::Lr8 => &LR8_Q,
        };
        for (i, &q) in qs.iter().enumerate() {
            design.lp[i] = coefficients(Shape::LowPass, freq, q, sample_rate)?;
            design.hp[i] = coefficients(Shape::HighPass, freq, q, sample_rate)?;
        }
        design.sections = qs.len();

        match mode {
            CrossoverMode::Lr2 => {
                design.ap[0] = first_order_allpass(freq, sample_rate);
                design.ap_sections = 1;
            }
            CrossoverMode::Lr4 => {
                design.ap[0] = coefficients(
                    Shape::AllPass,
                    freq,
                    std::f32::consts::FRAC_1_SQRT_2,
                    sample_rate,
                )?;
                design.ap_sections = 1;
            }
            CrossoverMode::Lr8 => {
                for (ap, q) in design.ap.iter_mut().zip(BW4_Q) {
                    *ap = coefficients(Shape::AllPass, freq, q, sample_rate)?;
                }
                design.ap_sections = 2;
            }
        }
        Ok(design)
    }
}

/// Parameter indices of a crossover
///
/// Input level and slope, the split frequencies, four parameters per band
/// (level, active, phase, delay), then meters: input channels first, then
/// every band's channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XoverLayout {
    pub bands: usize,
    pub channels: usize,
}

impl XoverLayout {
    pub const LEVEL: usize = 0;
    pub const MODE: usize = 1;

    pub fn freq(&self, split: usize) -> usize {
        2 + split
    }

    fn band_base(&self, band: usize) -> usize {
        2 + (self.bands - 1) + band * 4
    }

    pub fn band_level(&self, band: usize) -> usize {
        self.band_base(band)
    }

    pub fn band_active(&self, band: usize) -> usize {
        self.band_base(band) + 1
    }

    pub fn band_phase(&self, band: usize) -> usize {
        self.band_base(band) + 2
    }

    pub fn band_delay(&self, band: usize) -> usize {
        self.band_base(band) + 3
    }

    fn meter_base(&self) -> usize {
        self.band_base(self.bands)
    }

    pub fn meter_in(&self, channel: usize) -> usize {
        self.meter_base() + channel * 2
    }

    pub fn meter_band(&self, band: usize, channel: usize) -> usize {
        self.meter_base() + (self.channels + band * self.channels + channel) * 2
    }

    /// Output port of `channel` of `band`
    pub fn output(&self, band: usize, channel: usize) -> usize {
        band * self.channels + channel
    }

    fn default_freqs(&self) -> &'static [f32] {
        match self.bands {
            2 => &[1000.0],
            3 => &[150.0, 3000.0],
            _ => &[100.0, 1000.0, 6000.0],
        }
    }

    pub fn specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec::new("level", 1.0, 0.0, 64.0),
            ParamSpec::new("mode", 1.0, 0.0, 2.0),
        ];
        for (i, &freq) in self.default_freqs().iter().enumerate() {
            specs.push(ParamSpec::new(format!("freq{}", i), freq, 10.0, 20000.0));
        }
        for b in 0..self.bands {
            specs.push(ParamSpec::new(format!("level{}", b + 1), 1.0, 0.0, 64.0));
            specs.push(ParamSpec::toggle(format!("active{}", b + 1), true));
            specs.push(ParamSpec::toggle(format!("phase{}", b + 1), false));
            specs.push(ParamSpec::new(format!("delay{}", b + 1), 0.0, 0.0, MAX_DELAY_MS));
        }
        for ch in 0..self.channels {
            specs.push(ParamSpec::output(format!("meter_in_{}", ch)));
            specs.push(ParamSpec::output(format!("clip_in_{}", ch)));
        }
        for b in 0..self.bands {
            for ch in 0..self.channels {
                specs.push(ParamSpec::output(format!("meter_{}_{}", b + 1, ch)));
                specs.push(ParamSpec::output(format!("clip_{}_{}", b + 1, ch)));
            }
        }
        specs
    }

    fn meter_slots(&self) -> Vec<MeterSlot> {
        let inputs = (0..self.channels).map(|ch| self.meter_in(ch));
        let bands = (0..self.bands)
            .flat_map(|b| (0..self.channels).map(move |ch| (b, ch)))
            .map(|(b, ch)| self.meter_band(b, ch));
        inputs
            .chain(bands)
            .map(|level| MeterSlot::new(level, Some(level + 1)))
            .collect()
    }
}

/// Filter state of one channel
#[derive(Debug, Clone)]
struct ChannelSplitter {
    lp: [Cascade; MAX_SPLITS],
    hp: [Cascade; MAX_SPLITS],
    /// `ap[band][split]`, used for `split > band` only
    ap: [[Cascade; MAX_SPLITS]; MAX_SPLITS],
}

impl ChannelSplitter {
    fn new() -> Self {
        Self {
            lp: core::array::from_fn(|_| Cascade::new()),
            hp: core::array::from_fn(|_| Cascade::new()),
            ap: core::array::from_fn(|_| core::array::from_fn(|_| Cascade::new())),
        }
    }

    fn set_split(&mut self, split: usize, design: &SplitDesign) {
        self.lp[split].set_stages(&design.lp[..design.sections]);
        self.hp[split].set_stages(&design.hp[..design.sections]);
        for band in 0..split {
            self.ap[band][split].set_stages(&design.ap[..design.ap_sections]);
        }
    }

    fn reset(&mut self) {
        self.lp.iter_mut().for_each(Cascade::reset);
        self.hp.iter_mut().for_each(Cascade::reset);
        self.ap.iter_mut().flatten().for_each(Cascade::reset);
    }

    /// Split one sample into `bands` band samples
    #[inline]
    fn split(&mut self, x: f32, bands: usize, hp_sign: f32, out: &mut [f32; MAX_CROSSOVER_BANDS]) {
        let mut rest = x;
        for band in 0..bands - 1 {
            let mut low = self.lp[band].process(rest);
            for split in band + 1..bands - 1 {
                low = self.ap[band][split].process(low);
            }
            out[band] = low;
            rest = self.hp[band].process(rest) * hp_sign;
        }
        out[bands - 1] = rest;
    }
}

/// Committed split sections for the UI thread
#[derive(Debug, Default)]
struct SplitSnapshot {
    lp: CascadeSnapshot,
    hp: CascadeSnapshot,
    ap: CascadeSnapshot,
}

/// State shared with the UI thread
#[derive(Debug)]
pub struct XoverGraph {
    params: Arc<ParamBank>,
    layout: XoverLayout,
    splits: Vec<SplitSnapshot>,
    generation: GraphGeneration,
    sample_rate: AtomicU32,
}

impl XoverGraph {
    /// Magnitude of band `band`'s filter path at `freq`, before level and
    /// mute
    pub fn band_response(&self, band: usize, freq: f32) -> Result<f32, DspError> {
        let bands = self.layout.bands;
        if band >= bands {
            return Err(DspError::InvalidBandIndex {
                index: band,
                count: bands,
            });
        }
        let sample_rate = self.sample_rate.load(Ordering::Relaxed) as f32;
        let mut gain = 1.0;
        for (split, snapshot) in self.splits.iter().enumerate() {
            gain *= match split {
                s if s < band => snapshot.hp.freq_gain(freq, sample_rate),
                s if s == band => snapshot.lp.freq_gain(freq, sample_rate),
                _ => snapshot.ap.freq_gain(freq, sample_rate),
            };
        }
        Ok(gain)
    }

    pub fn generation(&self) -> &GraphGeneration {
        &self.generation
    }
}

impl FrequencyResponse for XoverGraph {
    fn freq_gain(&self, subindex: usize, freq: f32) -> f32 {
        let Ok(gain) = self.band_response(subindex, freq) else {
            return 0.0;
        };
        let active = self.params.get_bool(self.layout.band_active(subindex));
        let level = self.params.get(self.layout.band_level(subindex));
        if active {
            gain * level
        } else {
            0.0
        }
    }
}

impl LineGraph for XoverGraph {
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool {
        if index != 0 || phase || subindex >= self.layout.bands {
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
        self.generation.layers(generation, false)
    }
}

/// Per band values read once per block
#[derive(Debug, Clone, Copy, Default)]
struct BandState {
    gain: f32,
    delay: usize,
}

/// Band-splitting crossover with per band level, mute, phase and delay
pub struct Crossover {
    layout: XoverLayout,
    params: Arc<ParamBank>,
    graph: Arc<XoverGraph>,
    splitters: Vec<ChannelSplitter>,
    mode: CrossoverMode,
    freqs: [f32; MAX_SPLITS],
    bands: [BandState; MAX_CROSSOVER_BANDS],
    buffer: Vec<f32>,
    pos: usize,
    buffer_size: usize,
    meters: MeterBank,
    sample_rate: u32,
    is_active: bool,
}

impl Crossover {
    pub fn new(config: CrossoverConfig) -> CoreResult<Self> {
        config.validate()?;
        let layout = XoverLayout {
            bands: config.bands,
            channels: config.channels,
        };
        let params = Arc::new(ParamBank::new(layout.specs()));
        let graph = Arc::new(XoverGraph {
            params: Arc::clone(&params),
            layout,
            splits: (0..layout.bands - 1).map(|_| SplitSnapshot::default()).collect(),
            generation: GraphGeneration::new(),
            sample_rate: AtomicU32::new(48000),
        });
        let mut xover = Self {
            layout,
            params,
            graph,
            splitters: vec![ChannelSplitter::new(); layout.channels],
            mode: CrossoverMode::Lr4,
            freqs: [0.0; MAX_SPLITS],
            bands: [BandState::default(); MAX_CROSSOVER_BANDS],
            buffer: Vec::new(),
            pos: 0,
            buffer_size: 0,
            meters: MeterBank::new(layout.meter_slots()),
            sample_rate: 48000,
            is_active: false,
        };
        xover.set_sample_rate(48000);
        Ok(xover)
    }

    pub fn layout(&self) -> XoverLayout {
        self.layout
    }

    pub fn graph(&self) -> &Arc<XoverGraph> {
        &self.graph
    }

    pub fn mode(&self) -> CrossoverMode {
        self.mode
    }

    /// Interleaved frame stride of the delay buffer
    fn stride(&self) -> usize {
        self.layout.bands * self.layout.channels
    }

    fn max_delay_frames(&self) -> usize {
        (self.sample_rate as f32 * MAX_DELAY_MS / 1000.0).ceil() as usize
    }

    /// Recompute split sections that changed
    fn calculate_splits(&mut self, force: bool) {
        let mode = CrossoverMode::from_index(self.params.get_index(XoverLayout::MODE));
        let mode_changed = mode != self.mode;
        if mode_changed {
            debug!(?mode, "Crossover slope changed");
            self.mode = mode;
        }
        let sample_rate = self.sample_rate as f32;
        let mut changed = false;
        for split in 0..self.layout.bands - 1 {
            let freq = self.params.get(self.layout.freq(split));
            if !force && !mode_changed && freq == self.freqs[split] {
                continue;
            }
            let Ok(design) = SplitDesign::new(mode, freq, sample_rate) else {
                continue;
            };
            for splitter in &mut self.splitters {
                splitter.set_split(split, &design);
            }
            if let Some(first) = self.splitters.first() {
                let snapshot = &self.graph.splits[split];
                snapshot.lp.publish(&first.lp[split]);
                snapshot.hp.publish(&first.hp[split]);
                // Band 0 carries every all-pass
                match split {
                    0 => snapshot.ap.clear(),
                    _ => snapshot.ap.publish(&first.ap[0][split]),
                }
            }
            self.freqs[split] = freq;
            changed = true;
        }
        if changed {
            let generation = self.graph.generation.bump();
            self.graph.generation.mark_calculated(generation);
        }
    }

    fn read_bands(&mut self) {
        let max_delay = self.max_delay_frames();
        for band in 0..self.layout.bands {
            let level = self.params.get(self.layout.band_level(band));
            let active = self.params.get_bool(self.layout.band_active(band));
            let phase = if self.params.get_bool(self.layout.band_phase(band)) {
                -1.0
            } else {
                1.0
            };
            let delay_ms = self.params.get(self.layout.band_delay(band));
            self.bands[band] = BandState {
                gain: if active { level * phase } else { 0.0 },
                delay: ((delay_ms * self.sample_rate as f32 / 1000.0).round() as usize).min(max_delay),
            };
        }
    }
}

impl AudioModule for Crossover {
    fn name(&self) -> &'static str {
        "crossover"
    }

    fn params(&self) -> &Arc<ParamBank> {
        &self.params
    }

    fn input_count(&self) -> usize {
        self.layout.channels
    }

    fn output_count(&self) -> usize {
        self.layout.bands * self.layout.channels
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        debug_assert!(sample_rate > 0, "sample rate must be positive");
        self.sample_rate = sample_rate;
        self.graph.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.buffer_size = (self.max_delay_frames() + 1) * self.stride();
        self.buffer = vec![0.0; self.buffer_size];
        self.pos = 0;
        self.meters.set_sample_rate(sample_rate);
        self.calculate_splits(true);
        debug!(sample_rate, buffer_size = self.buffer_size, "Crossover sample rate set");
    }

    fn activate(&mut self) {
        info!(
            sample_rate = self.sample_rate,
            bands = self.layout.bands,
            "Activating crossover"
        );
        self.buffer.fill(0.0);
        self.pos = 0;
        self.splitters.iter_mut().for_each(ChannelSplitter::reset);
        self.calculate_splits(true);
        self.params_changed();
        self.meters.reset();
        self.is_active = true;
    }

    fn deactivate(&mut self) {
        info!("Deactivating crossover");
        self.is_active = false;
    }

    fn params_changed(&mut self) {
        self.calculate_splits(false);
        let old = self.bands;
        self.read_bands();
        if self.bands[..self.layout.bands]
            .iter()
            .zip(&old)
            .any(|(new, old)| new.gain != old.gain)
        {
            self.graph.generation.request_redraw();
        }
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
        let XoverLayout { bands, channels } = self.layout;

        if !self.is_active {
            for (port, out) in outs.iter_mut().enumerate() {
                if outputs_mask & (1 << port) != 0 {
                    out[offset..end].fill(0.0);
                }
            }
            return 0;
        }

        let level = self.params.get(XoverLayout::LEVEL);
        let hp_sign = self.mode.hp_sign();
        let stride = self.stride();
        let mut split = [0.0; MAX_CROSSOVER_BANDS];

        for i in offset..end {
            for ch in 0..channels {
                let x = match ins.get(ch) {
                    Some(input) if inputs_mask & (1 << ch) != 0 => input[i] * level,
                    _ => 0.0,
                };
                self.meters.update(ch, x);
                self.splitters[ch].split(x, bands, hp_sign, &mut split);

                for (band, &value) in split.iter().enumerate().take(bands) {
                    let slot = band * channels + ch;
                    self.buffer[self.pos + slot] = value;
                    let state = self.bands[band];
                    let delayed = if state.delay == 0 {
                        value
                    } else {
                        let back = state.delay * stride;
                        self.buffer[(self.pos + self.buffer_size - back) % self.buffer_size + slot]
                    };
                    let y = delayed * state.gain;
                    let port = self.layout.output(band, ch);
                    if outputs_mask & (1 << port) != 0 {
                        if let Some(out) = outs.get_mut(port) {
                            out[i] = y;
                        }
                    }
                    self.meters.update(channels + port, y);
                }
            }
            self.pos = (self.pos + stride) % self.buffer_size;
        }

        self.meters.fall(numsamples as u32);
        self.meters.publish(&self.params);
        outputs_mask & channel_mask(bands * channels)
    }

    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        Some(Arc::clone(&self.graph) as Arc<dyn LineGraph>)
    }
}

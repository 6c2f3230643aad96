//! Single-Filter Module
//!
//! One generic module type, [`FilterModule`], drives any [`FilterKind`]
//! through the smoothed control loop:
//!
//! ```text
//! params_changed() ──▶ cutoff / resonance / gain inertias (targets)
//!                                  │
//! process(): while samples left    ▼
//!   run = all ramps settled ? everything : samples to next control tick
//!   kind.process_channel(run)           one tick ≈ 1 ms
//!   tick elapsed ─▶ step ramps ─▶ kind.calculate_filter() ─▶ publish
//! ```
//!
//! While every ramp has converged the whole block goes through in one run,
//! so coefficient math only costs CPU while parameters move.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use heron_dsp::biquad::{clamp_frequency, clamp_q, coefficients, Cascade, CascadeSnapshot, Shape};
use heron_dsp::bypass::DEFAULT_BYPASS_TIME;
use heron_dsp::graph::{response_gridline, sample_curve, GainScale};
use heron_dsp::{
    Bypass, ExponentialRamp, GraphGeneration, Gridline, Inertia, LineGraph, OncePerN, Ramp,
};
use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::error::CoreResult;
use crate::meters::{MeterBank, MeterSlot};
use crate::module::{crossfade, pass_through, AudioModule};
use crate::params::{ParamBank, ParamSpec};

/// Output level below which a channel counts as silent (-160 dB)
const SILENCE_THRESHOLD: f32 = 1.0e-8;

/// A filter that [`FilterModule`] can drive
///
/// The module owns smoothing and scheduling; the kind owns the per-channel
/// filter state and the coefficient formulas.
pub trait FilterKind: Send + 'static {
    /// Number of values the mode parameter takes
    fn mode_count(&self) -> usize;

    fn set_sample_rate(&mut self, sample_rate: f32);

    /// Recompute coefficients from smoothed values
    fn calculate_filter(&mut self, freq: f32, q: f32, mode: usize, gain: f32);

    /// Clear all filter state
    fn filter_activate(&mut self);

    /// Filter one run of `output.len()` frames of channel `channel`
    ///
    /// `input` is `None` when the input channel is absent; the kind then lets
    /// its tail ring out. Returns true while the channel carries signal.
    fn process_channel(&mut self, channel: usize, input: Option<&[f32]>, output: &mut [f32]) -> bool;

    /// Commit the active coefficients for the UI thread
    fn publish(&self, snapshot: &CascadeSnapshot);

    /// Linear gain of the active coefficients at `freq`
    fn freq_gain(&self, freq: f32) -> f32;
}

/// Response family of a biquad filter mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFamily {
    LowPass,
    HighPass,
    BandPass,
    BandReject,
}

/// The twelve biquad filter modes: three orders per family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Lp12,
    Lp24,
    Lp36,
    Hp12,
    Hp24,
    Hp36,
    Bp6,
    Bp12,
    Bp18,
    Br6,
    Br12,
    Br18,
}

impl FilterMode {
    pub const COUNT: usize = 12;

    const ALL: [FilterMode; Self::COUNT] = [
        FilterMode::Lp12,
        FilterMode::Lp24,
        FilterMode::Lp36,
        FilterMode::Hp12,
        FilterMode::Hp24,
        FilterMode::Hp36,
        FilterMode::Bp6,
        FilterMode::Bp12,
        FilterMode::Bp18,
        FilterMode::Br6,
        FilterMode::Br12,
        FilterMode::Br18,
    ];

    /// Mode for a parameter value, clamped into range
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::COUNT - 1)]
    }

    pub fn family(self) -> FilterFamily {
        match self as usize / 3 {
            0 => FilterFamily::LowPass,
            1 => FilterFamily::HighPass,
            2 => FilterFamily::BandPass,
            _ => FilterFamily::BandReject,
        }
    }

    /// Number of cascaded sections (1-3)
    pub fn order(self) -> usize {
        self as usize % 3 + 1
    }

    /// Section shape and per-section Q for an overall resonance `q`
    ///
    /// Cascaded sections share the resonance (`q^(1/order)` each) so the
    /// overall peak stays put as the order changes. Band-reject widens its
    /// notches with the order instead.
    pub fn section(self, q: f32) -> (Shape, f32) {
        let order = self.order() as f32;
        match self.family() {
            FilterFamily::LowPass => (Shape::LowPass, q.powf(1.0 / order)),
            FilterFamily::HighPass => (Shape::HighPass, q.powf(1.0 / order)),
            FilterFamily::BandPass => (Shape::BandPass, q.powf(1.0 / order)),
            FilterFamily::BandReject => (Shape::Notch, order * 0.1 * q),
        }
    }
}

/// Cascaded RBJ biquads in one of the [`FilterMode`]s
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    channels: Vec<Cascade>,
    order: usize,
    sample_rate: f32,
}

impl BiquadFilter {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![Cascade::new(); channels],
            order: 0,
            sample_rate: 48000.0,
        }
    }

    /// Sections currently in the signal path
    pub fn order(&self) -> usize {
        self.order
    }
}

impl FilterKind for BiquadFilter {
    fn mode_count(&self) -> usize {
        FilterMode::COUNT
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    fn calculate_filter(&mut self, freq: f32, q: f32, mode: usize, gain: f32) {
        let mode = FilterMode::from_index(mode);
        let (shape, stage_q) = mode.section(q);
        let freq = clamp_frequency(freq, self.sample_rate);
        let Ok(coeffs) = coefficients(shape, freq, clamp_q(stage_q), self.sample_rate) else {
            return;
        };
        let order = mode.order();
        for cascade in &mut self.channels {
            if order > self.order {
                cascade.reset_from(self.order);
            }
            cascade.set_uniform(coeffs, order);
            cascade.set_gain(gain);
        }
        self.order = order;
    }

    fn filter_activate(&mut self) {
        for cascade in &mut self.channels {
            cascade.reset();
        }
    }

    fn process_channel(&mut self, channel: usize, input: Option<&[f32]>, output: &mut [f32]) -> bool {
        let Some(cascade) = self.channels.get_mut(channel) else {
            return false;
        };
        let mut peak = 0.0_f32;
        match input {
            Some(input) => {
                let mut input_peak = 0.0_f32;
                for (out, &x) in output.iter_mut().zip(input) {
                    *out = cascade.process(x);
                    input_peak = input_peak.max(x.abs());
                    peak = peak.max(out.abs());
                }
                if input_peak < SILENCE_THRESHOLD && peak < SILENCE_THRESHOLD {
                    // Flush the decayed tail before it turns denormal
                    cascade.reset();
                }
            }
            None => {
                for out in output.iter_mut() {
                    *out = cascade.process(0.0);
                    peak = peak.max(out.abs());
                }
                if peak < SILENCE_THRESHOLD {
                    cascade.reset();
                    output.fill(0.0);
                }
            }
        }
        peak >= SILENCE_THRESHOLD
    }

    fn publish(&self, snapshot: &CascadeSnapshot) {
        if let Some(first) = self.channels.first() {
            snapshot.publish(first);
        }
    }

    fn freq_gain(&self, freq: f32) -> f32 {
        self.channels
            .first()
            .map_or(1.0, |c| c.freq_gain(freq, self.sample_rate))
    }
}

/// Parameter indices of a filter module with `channels` channels
///
/// Fixed parameters first, then four meter outputs per channel:
/// input level, input clip, output level, output clip. The output RMS
/// levels of every channel follow the meters.
#[derive(Debug, Clone, Copy)]
pub struct FilterLayout {
    pub channels: usize,
}

impl FilterLayout {
    pub const BYPASS: usize = 0;
    pub const LEVEL_IN: usize = 1;
    pub const LEVEL_OUT: usize = 2;
    pub const FREQ: usize = 3;
    pub const RES: usize = 4;
    pub const MODE: usize = 5;
    pub const INERTIA: usize = 6;
    pub const GAIN: usize = 7;
    const FIXED: usize = 8;

    pub fn meter_in(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4
    }

    pub fn clip_in(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4 + 1
    }

    pub fn meter_out(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4 + 2
    }

    pub fn clip_out(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4 + 3
    }

    pub fn rms_out(&self, channel: usize) -> usize {
        Self::FIXED + self.channels * 4 + channel
    }

    pub fn specs(&self, mode_count: usize) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec::toggle("bypass", false),
            ParamSpec::new("level_in", 1.0, 0.015625, 64.0),
            ParamSpec::new("level_out", 1.0, 0.015625, 64.0),
            ParamSpec::new("freq", 2000.0, 10.0, 20000.0),
            ParamSpec::new("res", 0.707, 0.707, 32.0),
            ParamSpec::new("mode", 0.0, 0.0, (mode_count.max(1) - 1) as f32),
            ParamSpec::new("inertia", 20.0, 5.0, 100.0),
            ParamSpec::new("gain", 1.0, 0.0, 4.0),
        ];
        for ch in 0..self.channels {
            specs.push(ParamSpec::output(format!("meter_in_{}", ch)));
            specs.push(ParamSpec::output(format!("clip_in_{}", ch)));
            specs.push(ParamSpec::output(format!("meter_out_{}", ch)));
            specs.push(ParamSpec::output(format!("clip_out_{}", ch)));
        }
        for ch in 0..self.channels {
            specs.push(ParamSpec::output(format!("rms_out_{}", ch)));
        }
        specs
    }

    fn meter_slots(&self) -> Vec<MeterSlot> {
        (0..self.channels)
            .flat_map(|ch| {
                [
                    MeterSlot::new(self.meter_in(ch), Some(self.clip_in(ch))),
                    MeterSlot::new(self.meter_out(ch), Some(self.clip_out(ch)))
                        .with_rms(self.rms_out(ch)),
                ]
            })
            .collect()
    }
}

/// State shared with the UI thread
#[derive(Debug)]
pub struct FilterGraph {
    params: Arc<ParamBank>,
    generation: GraphGeneration,
    response: CascadeSnapshot,
    sample_rate: AtomicU32,
}

impl FilterGraph {
    /// Gain of the committed coefficients at `freq`
    pub fn freq_gain(&self, freq: f32) -> f32 {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed) as f32;
        self.response.freq_gain(freq, sample_rate)
    }

    pub fn generation(&self) -> &GraphGeneration {
        &self.generation
    }

    pub fn params(&self) -> &Arc<ParamBank> {
        &self.params
    }
}

impl heron_dsp::FrequencyResponse for FilterGraph {
    fn freq_gain(&self, _subindex: usize, freq: f32) -> f32 {
        FilterGraph::freq_gain(self, freq)
    }
}

impl LineGraph for FilterGraph {
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool {
        if index != 0 || subindex != 0 || phase {
            return false;
        }
        sample_curve(data, |f| self.freq_gain(f), |g| GainScale::Default.position(g));
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

/// Smoothed, control-rate scheduled filter over a [`FilterKind`]
pub struct FilterModule<K: FilterKind> {
    kind: K,
    layout: FilterLayout,
    params: Arc<ParamBank>,
    graph: Arc<FilterGraph>,
    cutoff: Inertia<ExponentialRamp>,
    resonance: Inertia<ExponentialRamp>,
    gain: Inertia<ExponentialRamp>,
    timer: OncePerN,
    bypass: Bypass,
    meters: MeterBank,
    mode: usize,
    sample_rate: u32,
    is_active: bool,
}

impl FilterModule<BiquadFilter> {
    /// Biquad filter with `channels` channels
    pub fn biquad(channels: usize) -> CoreResult<Self> {
        FilterConfig { channels }.validate()?;
        Self::new(BiquadFilter::new(channels), channels)
    }
}

impl<K: FilterKind> FilterModule<K> {
    /// Fails when `channels` is zero or exceeds the channel mask width
    pub fn new(kind: K, channels: usize) -> CoreResult<Self> {
        FilterConfig { channels }.validate()?;
        let layout = FilterLayout { channels };
        let params = Arc::new(ParamBank::new(layout.specs(kind.mode_count())));
        let graph = Arc::new(FilterGraph {
            params: Arc::clone(&params),
            generation: GraphGeneration::new(),
            response: CascadeSnapshot::new(),
            sample_rate: AtomicU32::new(48000),
        });
        let length = params.get(FilterLayout::INERTIA).round() as u32;
        let mut module = Self {
            cutoff: Inertia::exponential(length, params.get(FilterLayout::FREQ)),
            resonance: Inertia::exponential(length, params.get(FilterLayout::RES)),
            gain: Inertia::exponential(length, params.get(FilterLayout::GAIN)),
            kind,
            layout,
            params,
            graph,
            timer: OncePerN::for_sample_rate(48000),
            bypass: Bypass::new(),
            meters: MeterBank::new(layout.meter_slots()),
            mode: 0,
            sample_rate: 48000,
            is_active: false,
        };
        module.set_sample_rate(48000);
        Ok(module)
    }

    pub fn layout(&self) -> FilterLayout {
        self.layout
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Typed handle to the UI-side state
    pub fn graph(&self) -> &Arc<FilterGraph> {
        &self.graph
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Smoothed cutoff currently applied
    pub fn cutoff(&self) -> f32 {
        self.cutoff.get_last()
    }

    pub fn resonance(&self) -> f32 {
        self.resonance.get_last()
    }

    /// Any ramp still moving
    pub fn is_ramping(&self) -> bool {
        self.cutoff.active() || self.resonance.active() || self.gain.active()
    }

    fn set_ramp_length(&mut self) {
        let length = self.params.get(FilterLayout::INERTIA).round() as u32;
        if length != self.cutoff.ramp.length() {
            self.cutoff.set_length(length);
            self.resonance.set_length(length);
            self.gain.set_length(length);
        }
    }

    fn current_mode(&self) -> usize {
        self.params
            .get_index(FilterLayout::MODE)
            .min(self.kind.mode_count().saturating_sub(1))
    }

    /// Recompute coefficients from the smoothed values and commit them
    fn calculate_filter(&mut self) {
        let generation = self.graph.generation.last_generation();
        self.kind.calculate_filter(
            self.cutoff.get_last(),
            self.resonance.get_last(),
            self.mode,
            self.gain.get_last(),
        );
        self.kind.publish(&self.graph.response);
        self.graph.generation.mark_calculated(generation);
    }

    fn on_timer(&mut self) {
        self.cutoff.step();
        self.resonance.step();
        self.gain.step();
        self.calculate_filter();
    }
}

impl<K: FilterKind> AudioModule for FilterModule<K> {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn params(&self) -> &Arc<ParamBank> {
        &self.params
    }

    fn input_count(&self) -> usize {
        self.layout.channels
    }

    fn output_count(&self) -> usize {
        self.layout.channels
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        debug_assert!(sample_rate > 0, "sample rate must be positive");
        self.sample_rate = sample_rate;
        self.kind.set_sample_rate(sample_rate as f32);
        self.graph.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.timer = OncePerN::for_sample_rate(sample_rate);
        self.bypass.init(sample_rate, DEFAULT_BYPASS_TIME);
        self.meters.set_sample_rate(sample_rate);
        debug!(sample_rate, tick = self.timer.period(), "Filter sample rate set");
    }

    fn activate(&mut self) {
        info!(sample_rate = self.sample_rate, "Activating filter");
        self.set_ramp_length();
        self.cutoff.set_now(self.params.get(FilterLayout::FREQ));
        self.resonance.set_now(self.params.get(FilterLayout::RES));
        self.gain.set_now(self.params.get(FilterLayout::GAIN));
        self.mode = self.current_mode();
        self.bypass.set_now(self.params.get_bool(FilterLayout::BYPASS));
        self.params_changed();
        self.kind.filter_activate();
        self.timer.start();
        self.meters.reset();
        self.is_active = true;
    }

    fn deactivate(&mut self) {
        info!("Deactivating filter");
        self.kind.filter_activate();
        self.is_active = false;
    }

    fn params_changed(&mut self) {
        let freq = self.params.get(FilterLayout::FREQ);
        let res = self.params.get(FilterLayout::RES);
        let gain = self.params.get(FilterLayout::GAIN);
        let mode = self.current_mode();

        let changed = freq != self.cutoff.target()
            || res != self.resonance.target()
            || gain != self.gain.target()
            || mode != self.mode;

        self.set_ramp_length();
        self.cutoff.set_inertia(freq);
        self.resonance.set_inertia(res);
        self.gain.set_inertia(gain);
        if mode != self.mode {
            debug!(from = self.mode, to = mode, "Filter mode changed");
            self.mode = mode;
        }
        self.bypass.set_bypass(self.params.get_bool(FilterLayout::BYPASS));

        if changed {
            self.graph.generation.bump();
        }
        self.calculate_filter();
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
        let channels = self.layout.channels.min(outs.len());

        if !self.is_active || self.bypass.is_bypassed() {
            pass_through(ins, outs, offset, end, inputs_mask, outputs_mask);
            self.meter_block(ins, outs, offset, end, inputs_mask, outputs_mask);
            return inputs_mask & outputs_mask & crate::module::channel_mask(channels);
        }

        let mut ostate = 0;
        let mut pos = offset;
        while pos < end {
            let mut run = end - pos;
            if self.is_ramping() {
                run = self.timer.get(run as u32) as usize;
            }
            for (ch, out) in outs.iter_mut().enumerate().take(channels) {
                if outputs_mask & (1 << ch) == 0 {
                    continue;
                }
                let input = match ins.get(ch) {
                    Some(input) if inputs_mask & (1 << ch) != 0 => Some(&input[pos..pos + run]),
                    _ => None,
                };
                if self.kind.process_channel(ch, input, &mut out[pos..pos + run]) {
                    ostate |= 1 << ch;
                }
            }
            if self.timer.elapsed() {
                self.on_timer();
            }
            pos += run;
        }

        let level =
            self.params.get(FilterLayout::LEVEL_IN) * self.params.get(FilterLayout::LEVEL_OUT);
        if level != 1.0 {
            for (ch, out) in outs.iter_mut().enumerate().take(channels) {
                if outputs_mask & (1 << ch) != 0 {
                    out[offset..end].iter_mut().for_each(|s| *s *= level);
                }
            }
        }

        crossfade(&mut self.bypass, ins, outs, offset, end, inputs_mask, outputs_mask);
        self.meter_block(ins, outs, offset, end, inputs_mask, outputs_mask);
        ostate
    }

    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        Some(Arc::clone(&self.graph) as Arc<dyn LineGraph>)
    }
}

impl<K: FilterKind> FilterModule<K> {
    fn meter_block(
        &mut self,
        ins: &[&[f32]],
        outs: &[&mut [f32]],
        start: usize,
        end: usize,
        inputs_mask: u32,
        outputs_mask: u32,
    ) {
        let level_in = self.params.get(FilterLayout::LEVEL_IN);
        for ch in 0..self.layout.channels {
            if let Some(input) = ins.get(ch).filter(|_| inputs_mask & (1 << ch) != 0) {
                for &x in &input[start..end] {
                    self.meters.update(ch * 2, x * level_in);
                }
            }
            if let Some(output) = outs.get(ch).filter(|_| outputs_mask & (1 << ch) != 0) {
                for &y in &output[start..end] {
                    self.meters.update(ch * 2 + 1, y);
                }
            }
        }
        self.meters.fall((end - start) as u32);
        self.meters.publish(&self.params);
    }
}

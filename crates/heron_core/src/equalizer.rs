//! N-Band Equalizer
//!
//! Signal flow per channel:
//!
//! ```text
//! in ─▶ level_in ─▶ [HP] ─▶ [LP] ─▶ LS ─▶ HS ─▶ P1 … Pn ─▶ level_out ─▶ out
//! ```
//!
//! HP/LP exist only when the configuration asks for them; inactive stages
//! are skipped. Each stage glides its frequency, gain and Q through its own
//! inertia set, recomputed once per control tick while anything moves.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use heron_dsp::biquad::{clamp_frequency, clamp_q, coefficients, Cascade, CascadeSnapshot, Shape};
use heron_dsp::bypass::DEFAULT_BYPASS_TIME;
use heron_dsp::graph::{response_gridline, sample_curve, GainScale};
use heron_dsp::{
    Bypass, DspError, ExponentialRamp, FrequencyResponse, GraphGeneration, Gridline, Inertia,
    LineGraph, OncePerN, SpectrumAnalyzer,
};
use tracing::{debug, info};

use crate::config::EqualizerConfig;
use crate::error::CoreResult;
use crate::meters::{MeterBank, MeterSlot};
use crate::module::{channel_mask, crossfade, pass_through, AudioModule};
use crate::params::{ParamBank, ParamSpec};

/// Q of every high-pass/low-pass section
const PASS_Q: f32 = 0.707;

/// Gain range of shelves and peaks in dB
const MAX_BAND_DB: f32 = 36.0;

#[inline]
fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1.0e-9).log10()
}

/// One equalizer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    HighPass,
    LowPass,
    LowShelf,
    HighShelf,
    Peak(usize),
}

/// Parameter indices of one stage
///
/// Pass stages have a mode (12/24/36 dB) and no level or Q; shelves and
/// peaks have level (dB) and Q and no mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSlots {
    pub active: usize,
    pub freq: usize,
    pub level: Option<usize>,
    pub q: Option<usize>,
    pub mode: Option<usize>,
}

/// Parameter indices of an equalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqLayout {
    pub peak_bands: usize,
    pub has_hplp: bool,
    pub channels: usize,
}

impl EqLayout {
    pub const BYPASS: usize = 0;
    pub const LEVEL_IN: usize = 1;
    pub const LEVEL_OUT: usize = 2;
    pub const INDIVIDUALS: usize = 3;
    pub const ZOOM: usize = 4;
    pub const ANALYZER: usize = 5;
    pub const INERTIA: usize = 6;
    const FIXED: usize = 7;

    pub fn new(config: &EqualizerConfig) -> Self {
        Self {
            peak_bands: config.peak_bands,
            has_hplp: config.has_hplp,
            channels: config.channels,
        }
    }

    fn shelf_base(&self) -> usize {
        Self::FIXED + if self.has_hplp { 6 } else { 0 }
    }

    fn meter_base(&self) -> usize {
        self.shelf_base() + 8 + self.peak_bands * 4
    }

    /// Stages in processing order
    pub fn stages(&self) -> Vec<StageId> {
        let mut stages = Vec::with_capacity(self.peak_bands + 4);
        if self.has_hplp {
            stages.push(StageId::HighPass);
            stages.push(StageId::LowPass);
        }
        stages.push(StageId::LowShelf);
        stages.push(StageId::HighShelf);
        stages.extend((0..self.peak_bands).map(StageId::Peak));
        stages
    }

    /// Parameter slots of `stage`, `None` if this layout lacks it
    pub fn slots(&self, stage: StageId) -> Option<StageSlots> {
        let pass = |base: usize| StageSlots {
            active: base,
            freq: base + 1,
            level: None,
            q: None,
            mode: Some(base + 2),
        };
        let band = |base: usize| StageSlots {
            active: base,
            level: Some(base + 1),
            freq: base + 2,
            q: Some(base + 3),
            mode: None,
        };
        match stage {
            StageId::HighPass if self.has_hplp => Some(pass(Self::FIXED)),
            StageId::LowPass if self.has_hplp => Some(pass(Self::FIXED + 3)),
            StageId::HighPass | StageId::LowPass => None,
            StageId::LowShelf => Some(band(self.shelf_base())),
            StageId::HighShelf => Some(band(self.shelf_base() + 4)),
            StageId::Peak(i) if i < self.peak_bands => Some(band(self.shelf_base() + 8 + i * 4)),
            StageId::Peak(_) => None,
        }
    }

    pub fn meter_in(&self, channel: usize) -> usize {
        self.meter_base() + channel * 4
    }

    pub fn clip_in(&self, channel: usize) -> usize {
        self.meter_base() + channel * 4 + 1
    }

    pub fn meter_out(&self, channel: usize) -> usize {
        self.meter_base() + channel * 4 + 2
    }

    pub fn clip_out(&self, channel: usize) -> usize {
        self.meter_base() + channel * 4 + 3
    }

    /// Output RMS levels sit after every channel's peak meters
    pub fn rms_out(&self, channel: usize) -> usize {
        self.meter_base() + self.channels * 4 + channel
    }

    /// Default center frequency of peak `i`, log spaced over the midrange
    fn peak_default_freq(&self, i: usize) -> f32 {
        let t = (i + 1) as f32 / (self.peak_bands + 1) as f32;
        (100.0_f32 * 100.0_f32.powf(t)).round()
    }

    pub fn specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec::toggle("bypass", false),
            ParamSpec::new("level_in", 1.0, 0.015625, 64.0),
            ParamSpec::new("level_out", 1.0, 0.015625, 64.0),
            ParamSpec::toggle("individuals", true),
            ParamSpec::new("zoom", 0.25, 0.0625, 1.0),
            ParamSpec::toggle("analyzer", false),
            ParamSpec::new("inertia", 20.0, 1.0, 100.0),
        ];
        if self.has_hplp {
            for (name, freq) in [("hp", 30.0), ("lp", 18000.0)] {
                specs.push(ParamSpec::toggle(format!("{}_active", name), false));
                specs.push(ParamSpec::new(format!("{}_freq", name), freq, 10.0, 20000.0));
                specs.push(ParamSpec::new(format!("{}_mode", name), 1.0, 0.0, 2.0));
            }
        }
        let bands = [("ls".to_string(), 100.0), ("hs".to_string(), 5000.0)]
            .into_iter()
            .chain((0..self.peak_bands).map(|i| (format!("p{}", i + 1), self.peak_default_freq(i))));
        for (name, freq) in bands {
            specs.push(ParamSpec::toggle(format!("{}_active", name), false));
            specs.push(ParamSpec::new(format!("{}_level", name), 0.0, -MAX_BAND_DB, MAX_BAND_DB));
            specs.push(ParamSpec::new(format!("{}_freq", name), freq, 10.0, 20000.0));
            specs.push(ParamSpec::new(format!("{}_q", name), 0.707, 0.1, 100.0));
        }
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

/// Parameter values a stage was last retargeted to
#[derive(Debug, Clone, Copy, PartialEq)]
struct StageTarget {
    active: bool,
    freq: f32,
    gain: f32,
    q: f32,
    mode: usize,
}

struct Stage {
    id: StageId,
    slots: StageSlots,
    freq: Inertia<ExponentialRamp>,
    gain: Inertia<ExponentialRamp>,
    q: Inertia<ExponentialRamp>,
    active: bool,
    mode: usize,
    old: Option<StageTarget>,
    filters: Vec<Cascade>,
}

impl Stage {
    fn new(id: StageId, slots: StageSlots, channels: usize, params: &ParamBank) -> Self {
        let mut stage = Self {
            id,
            slots,
            freq: Inertia::exponential(1, 1000.0),
            gain: Inertia::exponential(1, 1.0),
            q: Inertia::exponential(1, PASS_Q),
            active: false,
            mode: 0,
            old: None,
            filters: vec![Cascade::new(); channels],
        };
        stage.set_now(stage.read_target(params));
        stage
    }

    fn read_target(&self, params: &ParamBank) -> StageTarget {
        StageTarget {
            active: params.get_bool(self.slots.active),
            freq: params.get(self.slots.freq),
            gain: self.slots.level.map_or(1.0, |i| db_to_gain(params.get(i))),
            q: self.slots.q.map_or(PASS_Q, |i| params.get(i)),
            mode: self.slots.mode.map_or(0, |i| params.get_index(i).min(2)),
        }
    }

    fn set_now(&mut self, target: StageTarget) {
        self.freq.set_now(target.freq);
        self.gain.set_now(target.gain);
        self.q.set_now(target.q);
        self.active = target.active;
        self.mode = target.mode;
        self.old = Some(target);
    }

    /// Retarget the ramps if anything moved since the last call
    fn retarget(&mut self, target: StageTarget) -> bool {
        if self.old == Some(target) {
            return false;
        }
        self.freq.set_inertia(target.freq);
        self.gain.set_inertia(target.gain);
        self.q.set_inertia(target.q);
        if target.active && !self.active {
            // Fresh start: no glide from stale values, no stale state
            self.freq.set_now(target.freq);
            self.gain.set_now(target.gain);
            self.q.set_now(target.q);
            self.filters.iter_mut().for_each(Cascade::reset);
        }
        self.active = target.active;
        self.mode = target.mode;
        self.old = Some(target);
        true
    }

    fn set_length(&mut self, length: u32) {
        self.freq.set_length(length);
        self.gain.set_length(length);
        self.q.set_length(length);
    }

    fn is_ramping(&self) -> bool {
        self.active && (self.freq.active() || self.gain.active() || self.q.active())
    }

    fn step(&mut self) {
        self.freq.step();
        self.gain.step();
        self.q.step();
    }

    fn shape(&self) -> (Shape, usize) {
        let db = gain_to_db(self.gain.get_last());
        match self.id {
            StageId::HighPass => (Shape::HighPass, self.mode + 1),
            StageId::LowPass => (Shape::LowPass, self.mode + 1),
            StageId::LowShelf => (Shape::LowShelf(db), 1),
            StageId::HighShelf => (Shape::HighShelf(db), 1),
            StageId::Peak(_) => (Shape::Peaking(db), 1),
        }
    }

    fn calculate(&mut self, sample_rate: f32) {
        let (shape, order) = self.shape();
        let freq = clamp_frequency(self.freq.get_last(), sample_rate);
        let Ok(coeffs) = coefficients(shape, freq, clamp_q(self.q.get_last()), sample_rate) else {
            return;
        };
        for cascade in &mut self.filters {
            if order > cascade.count() {
                cascade.reset_from(cascade.count());
            }
            cascade.set_uniform(coeffs, order);
        }
    }

    fn publish(&self, snapshot: &CascadeSnapshot) {
        match self.filters.first() {
            Some(cascade) if self.active => snapshot.publish(cascade),
            _ => snapshot.clear(),
        }
    }

    #[inline]
    fn process(&mut self, channel: usize, buffer: &mut [f32]) {
        if let Some(cascade) = self.filters.get_mut(channel) {
            for sample in buffer.iter_mut() {
                *sample = cascade.process(*sample);
            }
        }
    }
}

/// State shared with the UI thread
#[derive(Debug)]
pub struct EqGraph {
    params: Arc<ParamBank>,
    stages: Vec<CascadeSnapshot>,
    generation: GraphGeneration,
    sample_rate: AtomicU32,
    analyzer: SpectrumAnalyzer,
}

impl EqGraph {
    /// Subindex of the composite curve in [`FrequencyResponse::freq_gain`]
    pub const TOTAL: usize = 0;

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate.load(Ordering::Relaxed) as f32
    }

    /// Gain of stage `band` alone at `freq`
    pub fn band_gain(&self, band: usize, freq: f32) -> Result<f32, DspError> {
        let stage = self.stages.get(band).ok_or(DspError::InvalidBandIndex {
            index: band,
            count: self.stages.len(),
        })?;
        Ok(stage.freq_gain(freq, self.sample_rate()))
    }

    /// Product of every active stage at `freq`
    pub fn total_gain(&self, freq: f32) -> f32 {
        let sample_rate = self.sample_rate();
        self.stages
            .iter()
            .map(|s| s.freq_gain(freq, sample_rate))
            .product()
    }

    pub fn generation(&self) -> &GraphGeneration {
        &self.generation
    }

    pub fn analyzer(&self) -> &SpectrumAnalyzer {
        &self.analyzer
    }

    fn scale(&self) -> GainScale {
        GainScale::Zoomed(self.params.get(EqLayout::ZOOM))
    }
}

impl FrequencyResponse for EqGraph {
    /// Subindex 0 is the composite curve, `k + 1` is stage `k`
    fn freq_gain(&self, subindex: usize, freq: f32) -> f32 {
        if subindex == Self::TOTAL {
            return self.total_gain(freq);
        }
        self.band_gain(subindex - 1, freq).unwrap_or(1.0)
    }
}

impl LineGraph for EqGraph {
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool {
        if index != 0 {
            return false;
        }
        let scale = self.scale();
        if phase {
            return subindex == 0
                && self.params.get_bool(EqLayout::ANALYZER)
                && self.analyzer.fill_graph(data, |m| scale.position(m));
        }
        if subindex == 0 {
            sample_curve(data, |f| self.total_gain(f), |g| scale.position(g));
            return true;
        }
        if !self.params.get_bool(EqLayout::INDIVIDUALS) {
            return false;
        }
        // Individual curves of the stages in the signal path
        let Some(band) = (0..self.stages.len())
            .filter(|&i| self.stages[i].count() > 0)
            .nth(subindex - 1)
        else {
            return false;
        };
        let sample_rate = self.sample_rate();
        sample_curve(
            data,
            |f| self.stages[band].freq_gain(f, sample_rate),
            |g| scale.position(g),
        );
        true
    }

    fn get_gridline(&self, index: usize, subindex: usize, phase: bool) -> Option<Gridline> {
        if index != 0 || phase {
            return None;
        }
        response_gridline(subindex, self.scale())
    }

    fn get_layers(&self, index: usize, generation: u32) -> Option<u32> {
        if index != 0 {
            return None;
        }
        let analyzer = self.params.get_bool(EqLayout::ANALYZER);
        if analyzer {
            self.analyzer.update();
        }
        self.generation.layers(generation, analyzer)
    }
}

/// Configurable N-band parametric equalizer
pub struct Equalizer {
    layout: EqLayout,
    params: Arc<ParamBank>,
    graph: Arc<EqGraph>,
    stages: Vec<Stage>,
    timer: OncePerN,
    bypass: Bypass,
    meters: MeterBank,
    inertia: u32,
    old_zoom: f32,
    old_individuals: bool,
    sample_rate: u32,
    is_active: bool,
}

impl Equalizer {
    pub fn new(config: EqualizerConfig) -> CoreResult<Self> {
        config.validate()?;
        let layout = EqLayout::new(&config);
        let params = Arc::new(ParamBank::new(layout.specs()));
        let stages: Vec<Stage> = layout
            .stages()
            .into_iter()
            .filter_map(|id| layout.slots(id).map(|slots| (id, slots)))
            .map(|(id, slots)| Stage::new(id, slots, layout.channels, &params))
            .collect();
        let graph = Arc::new(EqGraph {
            params: Arc::clone(&params),
            stages: stages.iter().map(|_| CascadeSnapshot::new()).collect(),
            generation: GraphGeneration::new(),
            sample_rate: AtomicU32::new(48000),
            analyzer: SpectrumAnalyzer::new(48000, heron_dsp::analyzer::DEFAULT_FPS),
        });
        debug!(
            stages = stages.len(),
            has_hplp = layout.has_hplp,
            channels = layout.channels,
            "Equalizer created"
        );

        let mut eq = Self {
            layout,
            meters: MeterBank::new(layout.meter_slots()),
            params,
            graph,
            stages,
            timer: OncePerN::for_sample_rate(48000),
            bypass: Bypass::new(),
            inertia: 0,
            old_zoom: 0.0,
            old_individuals: false,
            sample_rate: 48000,
            is_active: false,
        };
        eq.set_sample_rate(48000);
        Ok(eq)
    }

    pub fn layout(&self) -> EqLayout {
        self.layout
    }

    pub fn graph(&self) -> &Arc<EqGraph> {
        &self.graph
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.iter().map(|s| s.id)
    }

    pub fn is_ramping(&self) -> bool {
        self.stages.iter().any(Stage::is_ramping)
    }

    fn set_ramp_length(&mut self) {
        let inertia = self.params.get(EqLayout::INERTIA).round().max(1.0) as u32;
        if inertia != self.inertia {
            self.inertia = inertia;
            for stage in &mut self.stages {
                stage.set_length(inertia);
            }
        }
    }

    fn calculate_filters(&mut self) {
        let generation = self.graph.generation.last_generation();
        let sample_rate = self.sample_rate as f32;
        for (stage, snapshot) in self.stages.iter_mut().zip(&self.graph.stages) {
            if stage.active {
                stage.calculate(sample_rate);
            }
            stage.publish(snapshot);
        }
        self.graph.generation.mark_calculated(generation);
    }

    fn on_timer(&mut self) {
        for stage in &mut self.stages {
            stage.step();
        }
        self.calculate_filters();
    }

    fn meter_block(
        &mut self,
        ins: &[&[f32]],
        outs: &[&mut [f32]],
        start: usize,
        end: usize,
        inputs_mask: u32,
        outputs_mask: u32,
    ) {
        let level_in = self.params.get(EqLayout::LEVEL_IN);
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

    fn feed_analyzer(&self, outs: &[&mut [f32]], start: usize, end: usize) {
        if !self.params.get_bool(EqLayout::ANALYZER) {
            return;
        }
        let Some(left) = outs.first() else {
            return;
        };
        let right = outs.get(1).unwrap_or(left);
        for i in start..end {
            self.graph.analyzer.push_sample(left[i], right[i]);
        }
    }
}

impl AudioModule for Equalizer {
    fn name(&self) -> &'static str {
        "equalizer"
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
        self.graph.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.graph.analyzer.set_sample_rate(sample_rate);
        self.timer = OncePerN::for_sample_rate(sample_rate);
        self.bypass.init(sample_rate, DEFAULT_BYPASS_TIME);
        self.meters.set_sample_rate(sample_rate);
        debug!(sample_rate, "Equalizer sample rate set");
    }

    fn activate(&mut self) {
        info!(
            sample_rate = self.sample_rate,
            stages = self.stages.len(),
            "Activating equalizer"
        );
        self.set_ramp_length();
        for stage in &mut self.stages {
            let target = stage.read_target(&self.params);
            stage.set_now(target);
            stage.filters.iter_mut().for_each(Cascade::reset);
        }
        self.bypass.set_now(self.params.get_bool(EqLayout::BYPASS));
        self.params_changed();
        self.graph.analyzer.reset();
        self.timer.start();
        self.meters.reset();
        self.is_active = true;
    }

    fn deactivate(&mut self) {
        info!("Deactivating equalizer");
        self.is_active = false;
    }

    fn params_changed(&mut self) {
        self.set_ramp_length();
        let mut changed = false;
        for stage in &mut self.stages {
            let target = stage.read_target(&self.params);
            changed |= stage.retarget(target);
        }
        self.bypass.set_bypass(self.params.get_bool(EqLayout::BYPASS));

        let zoom = self.params.get(EqLayout::ZOOM);
        let individuals = self.params.get_bool(EqLayout::INDIVIDUALS);
        if zoom != self.old_zoom || individuals != self.old_individuals {
            self.old_zoom = zoom;
            self.old_individuals = individuals;
            self.graph.generation.request_redraw();
        }

        if changed {
            self.graph.generation.bump();
        }
        self.calculate_filters();
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
        let mask = outputs_mask & channel_mask(channels);

        if !self.is_active || self.bypass.is_bypassed() {
            pass_through(ins, outs, offset, end, inputs_mask, outputs_mask);
            self.meter_block(ins, outs, offset, end, inputs_mask, outputs_mask);
            return mask;
        }

        let level_in = self.params.get(EqLayout::LEVEL_IN);
        let level_out = self.params.get(EqLayout::LEVEL_OUT);
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
                let buffer = &mut out[pos..pos + run];
                match ins.get(ch) {
                    Some(input) if inputs_mask & (1 << ch) != 0 => {
                        for (y, &x) in buffer.iter_mut().zip(&input[pos..pos + run]) {
                            *y = x * level_in;
                        }
                    }
                    _ => buffer.fill(0.0),
                }
                for stage in self.stages.iter_mut().filter(|s| s.active) {
                    stage.process(ch, buffer);
                }
                if level_out != 1.0 {
                    buffer.iter_mut().for_each(|y| *y *= level_out);
                }
            }
            if self.timer.elapsed() {
                self.on_timer();
            }
            pos += run;
        }

        crossfade(&mut self.bypass, ins, outs, offset, end, inputs_mask, outputs_mask);
        self.meter_block(ins, outs, offset, end, inputs_mask, outputs_mask);
        self.feed_analyzer(outs, offset, end);
        mask
    }

    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        Some(Arc::clone(&self.graph) as Arc<dyn LineGraph>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48000;

    fn active_eq(config: EqualizerConfig) -> Equalizer {
        let mut eq = Equalizer::new(config).unwrap();
        eq.set_sample_rate(SR);
        eq.activate();
        eq
    }

    fn run(eq: &mut Equalizer, input: &[f32]) -> Vec<f32> {
        let mut out_l = vec![0.0; input.len()];
        let mut out_r = vec![0.0; input.len()];
        {
            let ins: [&[f32]; 2] = [input, input];
            let mut outs: [&mut [f32]; 2] = [&mut out_l, &mut out_r];
            eq.process(&ins, &mut outs, 0, input.len(), 0b11, 0b11);
        }
        out_l
    }

    fn set_band(eq: &Equalizer, stage: StageId, db: f32, freq: f32, q: f32) {
        let slots = eq.layout().slots(stage).unwrap();
        eq.params().set(slots.active, 1.0);
        eq.params().set(slots.level.unwrap(), db);
        eq.params().set(slots.freq, freq);
        eq.params().set(slots.q.unwrap(), q);
    }

    #[test]
    fn test_layouts() {
        let five = Equalizer::new(EqualizerConfig::five_band()).unwrap();
        assert_eq!(five.stage_ids().count(), 5);
        assert!(five.layout().slots(StageId::HighPass).is_none());
        assert!(!five.params().specs().iter().any(|s| s.name.starts_with("hp_")));

        let twelve = Equalizer::new(EqualizerConfig::twelve_band()).unwrap();
        let ids: Vec<_> = twelve.stage_ids().collect();
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], StageId::HighPass);
        assert_eq!(ids[11], StageId::Peak(7));
        let layout = twelve.layout();
        assert_eq!(twelve.params().find("p8_q"), layout.slots(StageId::Peak(7)).unwrap().q);
        assert_eq!(twelve.params().find("meter_in_0"), Some(layout.meter_in(0)));
    }

    #[test]
    fn test_flat_by_default() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
        assert_eq!(run(&mut eq, &input), input);
        assert!((eq.graph().total_gain(1000.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_total_is_product_of_bands() {
        let mut eq = active_eq(EqualizerConfig::eight_band());
        set_band(&eq, StageId::LowShelf, 6.0, 120.0, 0.707);
        set_band(&eq, StageId::Peak(1), -9.0, 2500.0, 2.0);
        set_band(&eq, StageId::HighShelf, 3.0, 8000.0, 0.707);
        let hp = eq.layout().slots(StageId::HighPass).unwrap();
        eq.params().set(hp.active, 1.0);
        eq.params_changed();

        let graph = eq.graph();
        for f in [25.0, 100.0, 440.0, 2500.0, 9000.0, 18000.0] {
            let product: f32 = (1..=graph.stage_count()).map(|k| graph.freq_gain(k, f)).product();
            let total = graph.freq_gain(EqGraph::TOTAL, f);
            assert!((total - product).abs() < 1e-4 * product.max(1.0), "{} Hz", f);
        }
        assert!(graph.band_gain(99, 1000.0).is_err());

        let peak = graph.band_gain(5, 2500.0).unwrap();
        assert!((gain_to_db(peak) + 9.0).abs() < 0.05);
    }

    #[test]
    fn test_params_changed_is_idempotent() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        set_band(&eq, StageId::Peak(0), 12.0, 500.0, 1.0);
        eq.params_changed();
        assert!(!eq.is_ramping(), "newly enabled band starts at its target");

        eq.params().set(eq.layout().slots(StageId::Peak(0)).unwrap().freq, 800.0);
        eq.params_changed();
        assert!(eq.is_ramping());
        run(&mut eq, &vec![0.0; 48 * 5]);
        let generation = eq.graph().generation().last_generation();
        let remaining = eq.stages[2].freq.remaining();

        eq.params_changed();
        assert_eq!(eq.stages[2].freq.remaining(), remaining);
        assert_eq!(eq.graph().generation().last_generation(), generation);

        run(&mut eq, &vec![0.0; 48 * 20]);
        assert!(!eq.is_ramping());
        assert_eq!(eq.stages[2].freq.get_last(), 800.0);
    }

    #[test]
    fn test_graph_surface() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        set_band(&eq, StageId::Peak(2), 6.0, 3000.0, 1.0);
        eq.params_changed();
        let graph = eq.line_graph().unwrap();

        let mut data = [0.0; 64];
        assert!(graph.get_graph(0, 0, false, &mut data));
        assert!(graph.get_graph(0, 1, false, &mut data), "one individual curve");
        assert!(!graph.get_graph(0, 2, false, &mut data));
        assert!(!graph.get_graph(0, 0, true, &mut data), "analyzer off");

        eq.params().set(EqLayout::INDIVIDUALS, 0.0);
        assert!(!graph.get_graph(0, 1, false, &mut data));

        let lines: Vec<_> = (0..).map_while(|i| graph.get_gridline(0, i, false)).collect();
        assert!(lines.iter().any(|l| l.vertical));
        assert!(lines.iter().any(|l| !l.vertical));

        assert!(graph.get_layers(0, 0).is_some());
        assert!(graph.get_layers(0, 1).is_none(), "nothing changed since");
        eq.params().set(EqLayout::ZOOM, 1.0);
        eq.params_changed();
        assert!(graph.get_layers(0, 1).is_some());
    }

    #[test]
    fn test_analyzer_layer() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        eq.params().set(EqLayout::ANALYZER, 1.0);
        eq.params_changed();
        let input: Vec<f32> = (0..8192).map(|i| (i as f32 * 0.13).sin() * 0.5).collect();
        run(&mut eq, &input);

        let graph = eq.line_graph().unwrap();
        let mut data = [0.0; 64];
        assert!(!graph.get_graph(0, 0, true, &mut data), "no frame before the first tick");
        let layers = graph.get_layers(0, 5).unwrap_or(0);
        assert_ne!(layers & heron_dsp::LAYER_REALTIME_GRAPH, 0);
        assert!(graph.get_graph(0, 0, true, &mut data));
    }

    #[test]
    fn test_levels_and_meters() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        eq.params().set(EqLayout::LEVEL_IN, 2.0);
        eq.params().set(EqLayout::LEVEL_OUT, 0.5);
        eq.params_changed();
        let out = run(&mut eq, &[0.25; 64]);
        assert!(out.iter().all(|&y| (y - 0.25).abs() < 1e-6));

        let layout = eq.layout();
        assert!((eq.params().get(layout.meter_in(0)) - 0.5).abs() < 0.01);
        assert!((eq.params().get(layout.meter_out(1)) - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_rms_out_follows_level() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        let layout = eq.layout();
        assert_eq!(eq.params().find("rms_out_1"), Some(layout.rms_out(1)));

        run(&mut eq, &vec![0.3; 96000]);
        let rms = eq.params().get(layout.rms_out(0));
        assert!((rms - 0.3).abs() < 0.005, "rms {}", rms);

        eq.params().set(EqLayout::LEVEL_OUT, 0.5);
        eq.params_changed();
        run(&mut eq, &vec![0.3; 96000]);
        let rms = eq.params().get(layout.rms_out(1));
        assert!((rms - 0.15).abs() < 0.005, "rms {}", rms);
    }

    #[test]
    fn test_bypass_crossfades() {
        let mut eq = active_eq(EqualizerConfig::five_band());
        set_band(&eq, StageId::Peak(1), 12.0, 1000.0, 1.0);
        eq.params().set(EqLayout::BYPASS, 1.0);
        eq.params_changed();

        let input: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.1309).sin() * 0.5).collect();
        let out = run(&mut eq, &input);
        // Fully dry after the 5 ms ramp
        for (y, x) in out[1024..].iter().zip(&input[1024..]) {
            assert!((y - x).abs() < 1e-6);
        }
        assert!(!eq.bypass.is_ramping());
    }
}

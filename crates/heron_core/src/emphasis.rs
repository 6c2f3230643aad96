//! Emphasis Module
//!
//! Applies one of the [`EmphasisCurve`]s to every channel, in reproduction
//! (de-emphasis) or recording (pre-emphasis) direction. The curve is a single
//! biquad, rebuilt whenever the curve, direction or sample rate changes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use heron_dsp::biquad::{identity, AtomicCoefficients, BiquadStage};
use heron_dsp::bypass::DEFAULT_BYPASS_TIME;
use heron_dsp::graph::{response_gridline, sample_curve, GainScale};
use heron_dsp::{
    emphasis_coefficients, Bypass, EmphasisCurve, EmphasisMode, FrequencyResponse,
    GraphGeneration, Gridline, LineGraph,
};
use tracing::{debug, info};

use crate::config::EmphasisConfig;
use crate::error::CoreResult;
use crate::meters::{MeterBank, MeterSlot};
use crate::module::{channel_mask, crossfade, pass_through, AudioModule};
use crate::params::{ParamBank, ParamSpec};

/// Parameter indices of an emphasis module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmphasisLayout {
    pub channels: usize,
}

impl EmphasisLayout {
    pub const BYPASS: usize = 0;
    pub const LEVEL_IN: usize = 1;
    pub const LEVEL_OUT: usize = 2;
    pub const MODE: usize = 3;
    pub const CURVE: usize = 4;
    const FIXED: usize = 5;

    pub fn meter_in(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4
    }

    pub fn meter_out(&self, channel: usize) -> usize {
        Self::FIXED + channel * 4 + 2
    }

    pub fn specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec::toggle("bypass", false),
            ParamSpec::new("level_in", 1.0, 0.015625, 64.0),
            ParamSpec::new("level_out", 1.0, 0.015625, 64.0),
            ParamSpec::new("mode", 0.0, 0.0, 1.0),
            ParamSpec::new("type", 0.0, 0.0, (EmphasisCurve::ALL.len() - 1) as f32),
        ];
        for ch in 0..self.channels {
            specs.push(ParamSpec::output(format!("meter_in_{}", ch)));
            specs.push(ParamSpec::output(format!("clip_in_{}", ch)));
            specs.push(ParamSpec::output(format!("meter_out_{}", ch)));
            specs.push(ParamSpec::output(format!("clip_out_{}", ch)));
        }
        specs
    }

    fn meter_slots(&self) -> Vec<MeterSlot> {
        (0..self.channels)
            .flat_map(|ch| {
                [
                    MeterSlot::new(self.meter_in(ch), Some(self.meter_in(ch) + 1)),
                    MeterSlot::new(self.meter_out(ch), Some(self.meter_out(ch) + 1)),
                ]
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct EmphasisGraph {
    params: Arc<ParamBank>,
    section: AtomicCoefficients,
    sample_rate: AtomicU32,
    generation: GraphGeneration,
}

impl EmphasisGraph {
    pub fn generation(&self) -> &GraphGeneration {
        &self.generation
    }
}

impl FrequencyResponse for EmphasisGraph {
    fn freq_gain(&self, _subindex: usize, freq: f32) -> f32 {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed) as f32;
        heron_dsp::biquad::response(&self.section.load(), freq, sample_rate).norm() as f32
            * self.params.get(EmphasisLayout::LEVEL_OUT)
    }
}

impl LineGraph for EmphasisGraph {
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool {
        if index != 0 || subindex != 0 || phase {
            return false;
        }
        sample_curve(
            data,
            |f| self.freq_gain(0, f),
            |g| GainScale::Zoomed(0.25).position(g),
        );
        true
    }

    fn get_gridline(&self, index: usize, subindex: usize, phase: bool) -> Option<Gridline> {
        if index != 0 || phase {
            return None;
        }
        response_gridline(subindex, GainScale::Zoomed(0.25))
    }

    fn get_layers(&self, index: usize, generation: u32) -> Option<u32> {
        if index != 0 {
            return None;
        }
        self.generation.layers(generation, false)
    }
}

/// Record/playback emphasis filter
pub struct EmphasisModule {
    layout: EmphasisLayout,
    params: Arc<ParamBank>,
    graph: Arc<EmphasisGraph>,
    filters: Vec<BiquadStage>,
    curve: EmphasisCurve,
    mode: EmphasisMode,
    bypass: Bypass,
    meters: MeterBank,
    sample_rate: u32,
    is_active: bool,
}

impl EmphasisModule {
    pub fn new(config: EmphasisConfig) -> CoreResult<Self> {
        config.validate()?;
        let layout = EmphasisLayout {
            channels: config.channels,
        };
        let params = Arc::new(ParamBank::new(layout.specs()));
        let graph = Arc::new(EmphasisGraph {
            params: Arc::clone(&params),
            section: AtomicCoefficients::new(identity()),
            sample_rate: AtomicU32::new(48000),
            generation: GraphGeneration::new(),
        });
        let mut module = Self {
            layout,
            params,
            graph,
            filters: vec![BiquadStage::new(); layout.channels],
            curve: EmphasisCurve::Riaa,
            mode: EmphasisMode::Reproduction,
            bypass: Bypass::new(),
            meters: MeterBank::new(layout.meter_slots()),
            sample_rate: 48000,
            is_active: false,
        };
        module.set_sample_rate(48000);
        Ok(module)
    }

    pub fn graph(&self) -> &Arc<EmphasisGraph> {
        &self.graph
    }

    pub fn curve(&self) -> EmphasisCurve {
        self.curve
    }

    pub fn mode(&self) -> EmphasisMode {
        self.mode
    }

    fn calculate_filter(&mut self) {
        let coeffs = emphasis_coefficients(self.curve, self.mode, self.sample_rate as f32);
        for filter in &mut self.filters {
            filter.set_coefficients(coeffs);
        }
        self.graph.section.store(&coeffs);
        let generation = self.graph.generation.bump();
        self.graph.generation.mark_calculated(generation);
    }

    fn meter_block(&mut self, ins: &[&[f32]], outs: &[&mut [f32]], start: usize, end: usize) {
        let level_in = self.params.get(EmphasisLayout::LEVEL_IN);
        for ch in 0..self.layout.channels {
            if let Some(input) = ins.get(ch) {
                for &x in &input[start..end] {
                    self.meters.update(ch * 2, x * level_in);
                }
            }
            if let Some(output) = outs.get(ch) {
                for &y in &output[start..end] {
                    self.meters.update(ch * 2 + 1, y);
                }
            }
        }
        self.meters.fall((end - start) as u32);
        self.meters.publish(&self.params);
    }
}

impl AudioModule for EmphasisModule {
    fn name(&self) -> &'static str {
        "emphasis"
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
        self.bypass.init(sample_rate, DEFAULT_BYPASS_TIME);
        self.meters.set_sample_rate(sample_rate);
        self.calculate_filter();
    }

    fn activate(&mut self) {
        info!(sample_rate = self.sample_rate, "Activating emphasis");
        self.bypass.set_now(self.params.get_bool(EmphasisLayout::BYPASS));
        self.params_changed();
        self.filters.iter_mut().for_each(BiquadStage::reset);
        self.meters.reset();
        self.is_active = true;
    }

    fn deactivate(&mut self) {
        info!("Deactivating emphasis");
        self.is_active = false;
    }

    fn params_changed(&mut self) {
        let curve = EmphasisCurve::from_index(self.params.get_index(EmphasisLayout::CURVE));
        let mode = EmphasisMode::from_index(self.params.get_index(EmphasisLayout::MODE));
        if curve != self.curve || mode != self.mode {
            debug!(?curve, ?mode, "Emphasis curve changed");
            self.curve = curve;
            self.mode = mode;
            self.calculate_filter();
        }
        self.bypass.set_bypass(self.params.get_bool(EmphasisLayout::BYPASS));
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
            self.meter_block(ins, outs, offset, end);
            return inputs_mask & outputs_mask & channel_mask(channels);
        }

        let level_in = self.params.get(EmphasisLayout::LEVEL_IN);
        let level_out = self.params.get(EmphasisLayout::LEVEL_OUT);
        for (ch, out) in outs.iter_mut().enumerate().take(channels) {
            if outputs_mask & (1 << ch) == 0 {
                continue;
            }
            let filter = &mut self.filters[ch];
            match ins.get(ch) {
                Some(input) if inputs_mask & (1 << ch) != 0 => {
                    for i in offset..end {
                        out[i] = filter.process(input[i] * level_in) * level_out;
                    }
                }
                _ => {
                    for sample in &mut out[offset..end] {
                        *sample = filter.process_zero_input() * level_out;
                    }
                }
            }
        }

        crossfade(&mut self.bypass, ins, outs, offset, end, inputs_mask, outputs_mask);
        self.meter_block(ins, outs, offset, end);
        outputs_mask & channel_mask(channels)
    }

    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        Some(Arc::clone(&self.graph) as Arc<dyn LineGraph>)
    }
}

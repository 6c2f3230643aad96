//! Line-Graph Surface
//!
//! What a module exposes to a UI that draws its frequency response: sampled
//! curves on a log frequency axis, grid lines with legends, and a layer mask
//! telling the UI which cached layers went stale.
//!
//! # Staleness
//!
//! [`GraphGeneration`] holds two counters written without synchronization:
//! the control side bumps `last_generation` whenever a parameter that shapes
//! the curve changes, the audio side copies it into
//! `last_calculated_generation` after committing the matching coefficients.
//! The UI may display a curve up to one refresh cycle stale.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Lowest frequency on the graph axis
pub const GRAPH_MIN_FREQ: f32 = 20.0;

/// Highest frequency on the graph axis
pub const GRAPH_MAX_FREQ: f32 = 20000.0;

/// Layer bits returned by [`LineGraph::get_layers`]
pub const LAYER_NONE: u32 = 0;
pub const LAYER_CACHE_GRID: u32 = 1;
pub const LAYER_CACHE_GRAPH: u32 = 4;
pub const LAYER_REALTIME_GRAPH: u32 = 8;

/// Frequency lines drawn by [`frequency_gridline`]
const FREQUENCY_LINES: [u32; 10] = [20, 50, 100, 200, 500, 1000, 2000, 5000, 10000, 20000];

/// Candidate dB lines on each side of 0 dB
const GAIN_LINE_STEPS: i32 = 8;

/// Frequency of point `index` out of `points` spread log-evenly over the axis
#[inline]
pub fn graph_frequency(index: usize, points: usize) -> f32 {
    let t = index as f32 / points.max(1) as f32;
    GRAPH_MIN_FREQ * (GRAPH_MAX_FREQ / GRAPH_MIN_FREQ).powf(t)
}

/// Position of `freq` on the axis, 0.0 at 20 Hz and 1.0 at 20 kHz
#[inline]
pub fn frequency_position(freq: f32) -> f32 {
    (freq / GRAPH_MIN_FREQ).ln() / (GRAPH_MAX_FREQ / GRAPH_MIN_FREQ).ln()
}

/// Map a linear amplitude onto the default grid (0 dB at 0.4, ±48 dB span)
#[inline]
pub fn db_grid(amp: f32) -> f32 {
    amp.ln() / 256.0_f32.ln() + 0.4
}

/// Inverse of [`db_grid`]
#[inline]
pub fn db_grid_inv(pos: f32) -> f32 {
    256.0_f32.powf(pos - 0.4)
}

/// Map a linear amplitude onto a zoomed grid centred on 0 dB
///
/// `zoom` of 1.0 shows ±48 dB, 0.25 shows ±12 dB.
#[inline]
pub fn db_grid_zoomed(amp: f32, zoom: f32) -> f32 {
    amp.ln() / (256.0_f32.ln() * zoom.max(1.0e-3))
}

/// Sample a response curve onto the graph axis
///
/// `gain` returns a linear amplitude for a frequency, `map` places it on the
/// grid.
pub fn sample_curve(data: &mut [f32], gain: impl Fn(f32) -> f32, map: impl Fn(f32) -> f32) {
    let points = data.len();
    for (i, point) in data.iter_mut().enumerate() {
        *point = map(gain(graph_frequency(i, points)));
    }
}

/// Text attached to a grid line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Legend {
    None,
    Hertz(u32),
    Decibels(f32),
}

impl fmt::Display for Legend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Legend::None => Ok(()),
            Legend::Hertz(hz) if hz >= 1000 => write!(f, "{} kHz", hz / 1000),
            Legend::Hertz(hz) => write!(f, "{} Hz", hz),
            Legend::Decibels(db) if db == 0.0 => write!(f, "0 dB"),
            Legend::Decibels(db) if db.fract() == 0.0 => write!(f, "{:+.0} dB", db),
            Legend::Decibels(db) => write!(f, "{:+.1} dB", db),
        }
    }
}

/// One grid line: a position on its axis, its direction and a legend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gridline {
    pub pos: f32,
    pub vertical: bool,
    pub legend: Legend,
}

/// Vertical frequency line `subindex`, or `None` past the last one
pub fn frequency_gridline(subindex: usize) -> Option<Gridline> {
    let hz = *FREQUENCY_LINES.get(subindex)?;
    let legend = match hz {
        100 | 1000 | 10000 => Legend::Hertz(hz),
        _ => Legend::None,
    };
    Some(Gridline {
        pos: frequency_position(hz as f32),
        vertical: true,
        legend,
    })
}

/// How amplitudes map onto a graph's vertical axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainScale {
    /// [`db_grid`]: 0 dB at 0.4, lines every 12 dB
    Default,
    /// [`db_grid_zoomed`] with the given zoom, lines every `24 * zoom` dB
    Zoomed(f32),
}

impl GainScale {
    #[inline]
    pub fn position(self, amp: f32) -> f32 {
        match self {
            GainScale::Default => db_grid(amp),
            GainScale::Zoomed(zoom) => db_grid_zoomed(amp, zoom),
        }
    }

    fn step_db(self) -> f32 {
        match self {
            GainScale::Default => 12.0,
            GainScale::Zoomed(zoom) => 24.0 * zoom,
        }
    }
}

/// Horizontal dB line `subindex`, counting only lines inside the visible
/// range
///
/// Every other line (0 dB included) carries a legend.
pub fn gain_gridline(subindex: usize, scale: GainScale) -> Option<Gridline> {
    let step = scale.step_db();
    (-GAIN_LINE_STEPS..=GAIN_LINE_STEPS)
        .map(|k| {
            let db = k as f32 * step;
            let legend = if k % 2 == 0 {
                Legend::Decibels(db)
            } else {
                Legend::None
            };
            Gridline {
                pos: scale.position(10.0_f32.powf(db / 20.0)),
                vertical: false,
                legend,
            }
        })
        .filter(|line| line.pos.abs() <= 1.0 + 1.0e-3)
        .nth(subindex)
}

/// Frequency lines first, then dB lines
pub fn response_gridline(subindex: usize, scale: GainScale) -> Option<Gridline> {
    if subindex < FREQUENCY_LINES.len() {
        frequency_gridline(subindex)
    } else {
        gain_gridline(subindex - FREQUENCY_LINES.len(), scale)
    }
}

/// Frequency-domain transfer function of a module
pub trait FrequencyResponse {
    /// Linear gain of curve `subindex` at `freq`
    fn freq_gain(&self, subindex: usize, freq: f32) -> f32;
}

/// Query surface for a UI that draws a module's curves
///
/// Every method is a pure read of already committed state and is safe to
/// call while the audio thread is processing.
pub trait LineGraph: Send + Sync {
    /// Fill `data` with curve `subindex` of graph `index`
    ///
    /// `phase` false asks for the cached layer, true for the realtime layer.
    /// Returns false when there is no such curve.
    fn get_graph(&self, index: usize, subindex: usize, phase: bool, data: &mut [f32]) -> bool;

    /// Grid line `subindex` of graph `index`, or `None` past the last one
    fn get_gridline(&self, index: usize, subindex: usize, phase: bool) -> Option<Gridline>;

    /// Which layers need redrawing for a UI that has drawn `generation`
    /// frames so far (0 = never)
    ///
    /// Called once at the start of every UI frame. Graphs with a live
    /// spectrum advance their analyzer here.
    fn get_layers(&self, index: usize, generation: u32) -> Option<u32>;
}

/// Generation counter pair plus a redraw flag
#[derive(Debug, Default)]
pub struct GraphGeneration {
    last_generation: AtomicI32,
    last_calculated_generation: AtomicI32,
    redraw: AtomicBool,
}

impl GraphGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// A curve-shaping parameter changed
    pub fn bump(&self) -> i32 {
        self.redraw.store(true, Ordering::Relaxed);
        self.last_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Coefficients for `generation` (read before recalculating) were
    /// committed
    pub fn mark_calculated(&self, generation: i32) {
        self.last_calculated_generation
            .store(generation, Ordering::Relaxed);
        self.redraw.store(true, Ordering::Relaxed);
    }

    /// Force a redraw without a parameter change (zoom, individual curves)
    pub fn request_redraw(&self) {
        self.redraw.store(true, Ordering::Relaxed);
    }

    pub fn last_generation(&self) -> i32 {
        self.last_generation.load(Ordering::Relaxed)
    }

    pub fn last_calculated_generation(&self) -> i32 {
        self.last_calculated_generation.load(Ordering::Relaxed)
    }

    /// True while the displayed curve lags the parameters
    pub fn is_stale(&self) -> bool {
        self.last_generation() != self.last_calculated_generation()
    }

    /// Layer mask for [`LineGraph::get_layers`]
    ///
    /// The grid is drawn once; the cached graph whenever something changed
    /// or the curve is still catching up; the realtime graph every frame
    /// when `realtime` is set. Clears the redraw flag.
    pub fn layers(&self, generation: u32, realtime: bool) -> Option<u32> {
        let redraw = self.redraw.swap(false, Ordering::Relaxed);
        let mut layers = LAYER_NONE;
        if generation == 0 {
            layers |= LAYER_CACHE_GRID;
        }
        if generation == 0 || redraw || self.is_stale() {
            layers |= LAYER_CACHE_GRAPH;
        }
        if realtime {
            layers |= LAYER_REALTIME_GRAPH;
        }
        (layers != LAYER_NONE).then_some(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_endpoints() {
        assert!((graph_frequency(0, 100) - 20.0).abs() < 1e-3);
        assert!((graph_frequency(100, 100) - 20000.0).abs() < 0.5);
        assert!((frequency_position(20.0)).abs() < 1e-6);
        assert!((frequency_position(20000.0) - 1.0).abs() < 1e-6);
        let mid = graph_frequency(50, 100);
        assert!((frequency_position(mid) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_db_grid() {
        assert!((db_grid(1.0) - 0.4).abs() < 1e-6);
        assert!((db_grid(256.0) - 1.4).abs() < 1e-5);
        assert!((db_grid_inv(db_grid(3.5)) - 3.5).abs() < 1e-4);
        assert!(db_grid_zoomed(1.0, 0.25).abs() < 1e-6);
        // +12 dB reaches the top edge at zoom 0.25
        let top = db_grid_zoomed(10.0_f32.powf(12.0 / 20.0), 0.25);
        assert!((top - 1.0).abs() < 0.01, "top {}", top);
    }

    #[test]
    fn test_frequency_gridlines() {
        let lines: Vec<Gridline> = (0..).map_while(frequency_gridline).collect();
        assert_eq!(lines.len(), 10);
        assert!(lines.iter().all(|l| l.vertical));
        assert!(lines.windows(2).all(|w| w[0].pos < w[1].pos));
        let labels: Vec<String> = lines
            .iter()
            .filter(|l| l.legend != Legend::None)
            .map(|l| l.legend.to_string())
            .collect();
        assert_eq!(labels, ["100 Hz", "1 kHz", "10 kHz"]);
    }

    #[test]
    fn test_zoomed_gain_gridlines() {
        let scale = GainScale::Zoomed(0.25);
        let lines: Vec<Gridline> = (0..).map_while(|i| gain_gridline(i, scale)).collect();
        let labels: Vec<String> = lines.iter().map(|l| l.legend.to_string()).collect();
        assert_eq!(labels, ["-12 dB", "", "0 dB", "", "+12 dB"]);
        assert!(lines.iter().all(|l| !l.vertical));
        assert!(lines[2].pos.abs() < 1e-6);
        assert_eq!(Legend::Decibels(1.5).to_string(), "+1.5 dB");
    }

    #[test]
    fn test_default_gain_gridlines() {
        let lines: Vec<Gridline> = (0..)
            .map_while(|i| gain_gridline(i, GainScale::Default))
            .collect();
        assert_eq!(lines.len(), 8);
        assert!(lines.windows(2).all(|w| w[0].pos < w[1].pos));
        let zero = lines
            .iter()
            .find(|l| l.legend == Legend::Decibels(0.0))
            .unwrap();
        assert!((zero.pos - 0.4).abs() < 1e-6);
        assert!(response_gridline(10 + 8, GainScale::Default).is_none());
        assert!(response_gridline(3, GainScale::Default).unwrap().vertical);
    }

    #[test]
    fn test_sample_curve() {
        let mut data = [0.0; 32];
        sample_curve(&mut data, |_| 1.0, db_grid);
        assert!(data.iter().all(|&v| (v - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_generation_pair() {
        let generation = GraphGeneration::new();
        assert!(!generation.is_stale());
        assert_eq!(generation.bump(), 1);
        assert!(generation.is_stale());
        generation.mark_calculated(generation.last_generation());
        assert!(!generation.is_stale());
        assert_eq!(generation.last_calculated_generation(), 1);
    }

    #[test]
    fn test_layers() {
        let generation = GraphGeneration::new();
        assert_eq!(
            generation.layers(0, false),
            Some(LAYER_CACHE_GRID | LAYER_CACHE_GRAPH)
        );
        // Nothing changed since the first frame
        assert_eq!(generation.layers(1, false), None);
        assert_eq!(generation.layers(1, true), Some(LAYER_REALTIME_GRAPH));

        generation.bump();
        assert_eq!(generation.layers(2, false), Some(LAYER_CACHE_GRAPH));
        // Still stale until the audio side commits
        assert_eq!(generation.layers(3, false), Some(LAYER_CACHE_GRAPH));
        generation.mark_calculated(1);
        assert_eq!(generation.layers(4, false), Some(LAYER_CACHE_GRAPH));
        assert_eq!(generation.layers(5, false), None);
    }

    #[test]
    fn test_layers_first_frame_with_analyzer() {
        let generation = GraphGeneration::new();
        // Every bit a graph can report, and nothing else
        assert_eq!(
            generation.layers(0, true),
            Some(LAYER_CACHE_GRID | LAYER_CACHE_GRAPH | LAYER_REALTIME_GRAPH)
        );
    }
}

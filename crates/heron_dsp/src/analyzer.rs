//! FFT Spectrum Analyzer
//!
//! Feeds the realtime layer of the module graphs. The audio thread pushes
//! samples into a ring of atomics; the UI thread computes the FFT at its own
//! frame rate and reads magnitudes back either as coarse log-spaced bins or
//! resampled onto the graph's frequency axis.
//!
//! # Architecture
//!
//! - Audio thread: [`push_sample()`](SpectrumAnalyzer::push_sample) only,
//!   lock-free and allocation-free.
//! - UI thread: [`update()`](SpectrumAnalyzer::update) once per frame, then
//!   any number of reads through
//!   [`get_spectrum()`](SpectrumAnalyzer::get_spectrum) and
//!   [`fill_graph()`](SpectrumAnalyzer::fill_graph). These take
//!   `parking_lot` locks that the audio thread never touches.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::debug;

use crate::graph::graph_frequency;

/// FFT size (power of 2)
/// 4096 samples at 48kHz = ~85ms window, ~12Hz resolution
pub const FFT_SIZE: usize = 4096;

/// Number of log-spaced bins returned by `get_spectrum()`
pub const NUM_BINS: usize = 32;

/// Default analysis rate in frames per second
pub const DEFAULT_FPS: u32 = 30;

/// Smoothing factor for spectrum decay (0.0 = instant, 1.0 = no decay)
const SPECTRUM_DECAY: f32 = 0.7;

/// Attack factor for spectrum rise
const SPECTRUM_ATTACK: f32 = 0.5;

/// Magnitude of a full-scale sine after the Hann window
const REFERENCE_MAGNITUDE: f32 = FFT_SIZE as f32 / 4.0;

fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

struct FftWork {
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

/// Spectrum analyzer shared between the audio and UI threads
pub struct SpectrumAnalyzer {
    /// Ring buffer of mono samples stored as `f32` bits
    samples: Vec<AtomicU32>,
    write_pos: AtomicU32,
    samples_since_fft: AtomicU32,
    samples_per_fft: AtomicU32,
    sample_rate: AtomicU32,
    spectrum_ready: AtomicBool,
    has_frame: AtomicBool,
    /// Smoothed linear magnitudes, normalized so a full-scale sine reads ~1.0
    magnitudes: RwLock<Vec<f32>>,
    /// Log-spaced bins, 0.0..1.0 over -60..0 dB
    bins: RwLock<[f32; NUM_BINS]>,
    fft: Arc<dyn Fft<f32>>,
    work: Mutex<FftWork>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate())
            .field("samples_per_fft", &self.samples_per_fft.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    /// Create an analyzer computing about `fps` spectra per second
    pub fn new(sample_rate: u32, fps: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let analyzer = Self {
            samples: (0..FFT_SIZE).map(|_| AtomicU32::new(0)).collect(),
            write_pos: AtomicU32::new(0),
            samples_since_fft: AtomicU32::new(0),
            samples_per_fft: AtomicU32::new(1),
            sample_rate: AtomicU32::new(sample_rate),
            spectrum_ready: AtomicBool::new(false),
            has_frame: AtomicBool::new(false),
            magnitudes: RwLock::new(vec![0.0; FFT_SIZE / 2]),
            bins: RwLock::new([0.0; NUM_BINS]),
            fft,
            work: Mutex::new(FftWork {
                window: (0..FFT_SIZE).map(|i| hann_window(i, FFT_SIZE)).collect(),
                buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            }),
        };
        analyzer.set_rate(sample_rate, fps);
        analyzer
    }

    /// Change the sample rate, keeping the default frame rate
    pub fn set_sample_rate(&self, sample_rate: u32) {
        debug!(sample_rate, "Spectrum analyzer rate changed");
        self.set_rate(sample_rate, DEFAULT_FPS);
        self.reset();
    }

    fn set_rate(&self, sample_rate: u32, fps: u32) {
        let per_fft = (sample_rate / fps.max(1)).max(1);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.samples_per_fft.store(per_fft, Ordering::Relaxed);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Push a stereo sample pair (mixed to mono)
    ///
    /// # Real-time Safety
    /// - No allocations
    /// - No locks (atomic operations only)
    /// - O(1) time complexity
    #[inline]
    pub fn push_sample(&self, left: f32, right: f32) {
        let mono = (left + right) * 0.5;

        // Single writer: load/store on the position is enough
        let pos = self.write_pos.load(Ordering::Relaxed) as usize % FFT_SIZE;
        self.samples[pos].store(mono.to_bits(), Ordering::Relaxed);
        self.write_pos
            .store(((pos + 1) % FFT_SIZE) as u32, Ordering::Relaxed);

        // update() resets the counter, so a frame is never dropped
        let count = self.samples_since_fft.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.samples_per_fft.load(Ordering::Relaxed) {
            self.spectrum_ready.store(true, Ordering::Release);
        }
    }

    /// Compute a new spectrum if enough samples arrived since the last one
    ///
    /// Call from the UI thread. Returns true if the spectrum changed.
    pub fn update(&self) -> bool {
        if !self.spectrum_ready.swap(false, Ordering::Acquire) {
            return false;
        }
        self.samples_since_fft.store(0, Ordering::Relaxed);

        let mut work = self.work.lock();
        let FftWork { window, buffer } = &mut *work;

        // Oldest sample first
        let read_pos = self.write_pos.load(Ordering::Relaxed) as usize;
        for (i, (slot, w)) in buffer.iter_mut().zip(window.iter()).enumerate() {
            let bits = self.samples[(read_pos + i) % FFT_SIZE].load(Ordering::Relaxed);
            *slot = Complex::new(f32::from_bits(bits) * w, 0.0);
        }
        self.fft.process(buffer.as_mut_slice());

        {
            let mut magnitudes = self.magnitudes.write();
            for (smoothed, c) in magnitudes.iter_mut().zip(buffer.iter()) {
                let raw = c.norm() / REFERENCE_MAGNITUDE;
                *smoothed = smooth(*smoothed, raw);
            }
        }

        let mut bins = self.bins.write();
        let mut raw_bins = [0.0; NUM_BINS];
        compute_log_spectrum(&buffer[..FFT_SIZE / 2], &mut raw_bins);
        for (smoothed, raw) in bins.iter_mut().zip(raw_bins) {
            *smoothed = smooth(*smoothed, raw);
        }

        self.has_frame.store(true, Ordering::Relaxed);
        true
    }

    /// Smoothed log-spaced bins, each 0.0 to 1.0 (-60 dB to 0 dB)
    pub fn get_spectrum(&self) -> [f32; NUM_BINS] {
        *self.bins.read()
    }

    /// Smoothed linear magnitude at `freq` (1.0 = full-scale sine)
    pub fn magnitude_at(&self, freq: f32) -> f32 {
        let bin = self.bin_for(freq);
        self.magnitudes.read()[bin]
    }

    /// Resample the last computed spectrum onto the graph's log frequency
    /// axis
    ///
    /// `map` converts a linear magnitude into a graph position. Returns false
    /// until [`update()`](Self::update) has computed the first frame.
    pub fn fill_graph(&self, data: &mut [f32], map: impl Fn(f32) -> f32) -> bool {
        if !self.has_frame.load(Ordering::Relaxed) {
            return false;
        }
        let magnitudes = self.magnitudes.read();
        let points = data.len();
        for (i, point) in data.iter_mut().enumerate() {
            let bin = self.bin_for(graph_frequency(i, points));
            *point = map(magnitudes[bin].max(1.0e-6));
        }
        true
    }

    fn bin_for(&self, freq: f32) -> usize {
        let sample_rate = self.sample_rate().max(1) as f32;
        let bin = (freq * FFT_SIZE as f32 / sample_rate).round();
        (bin.max(0.0) as usize).min(FFT_SIZE / 2 - 1)
    }

    /// Clear samples and spectra
    pub fn reset(&self) {
        for sample in &self.samples {
            sample.store(0, Ordering::Relaxed);
        }
        self.write_pos.store(0, Ordering::Relaxed);
        self.samples_since_fft.store(0, Ordering::Relaxed);
        self.spectrum_ready.store(false, Ordering::Relaxed);
        self.has_frame.store(false, Ordering::Relaxed);
        self.magnitudes.write().fill(0.0);
        *self.bins.write() = [0.0; NUM_BINS];
    }
}

/// Asymmetric attack/decay smoothing for display
#[inline]
fn smooth(current: f32, raw: f32) -> f32 {
    if raw > current {
        current + (raw - current) * SPECTRUM_ATTACK
    } else {
        current * SPECTRUM_DECAY + raw * (1.0 - SPECTRUM_DECAY)
    }
}

/// Convert FFT output to logarithmically-spaced magnitude bins
fn compute_log_spectrum(fft_output: &[Complex<f32>], spectrum: &mut [f32; NUM_BINS]) {
    let max_bin = fft_output.len();
    // Skip DC
    let log_min = 1.0_f32.ln();
    let log_max = (max_bin as f32).ln();
    let log_step = (log_max - log_min) / NUM_BINS as f32;

    for (i, spectrum_bin) in spectrum.iter_mut().enumerate() {
        let bin_start = (log_min + i as f32 * log_step).exp() as usize;
        let bin_end = ((log_min + (i + 1) as f32 * log_step).exp() as usize + 1).min(max_bin);
        let bin_start = bin_start.min(bin_end.saturating_sub(1));

        let (sum, count): (f32, usize) = fft_output[bin_start..bin_end]
            .iter()
            .map(|c| c.norm())
            .fold((0.0, 0), |(s, c), mag| (s + mag, c + 1));
        let avg_mag = if count > 0 { sum / count as f32 } else { 0.0 };

        let db = 20.0 * (avg_mag / REFERENCE_MAGNITUDE).max(1e-10).log10();
        // -60dB..0dB onto 0.0..1.0
        *spectrum_bin = ((db + 60.0) / 60.0).clamp(0.0, 1.0);
    }
}

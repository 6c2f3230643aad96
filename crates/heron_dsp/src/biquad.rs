//! BiQuad Filter Primitive
//!
//! Second-order IIR sections built on the `biquad` crate's
//! `DirectForm2Transposed` runtime, plus the coefficient formulas the
//! modules need (RBJ Audio EQ Cookbook shapes, unity-peak band-pass,
//! first-order all-pass) and lock-free coefficient snapshots that the UI
//! thread reads to draw frequency responses.
//!
//! # Numeric contract
//!
//! `process()` is O(1) with no data-dependent branches. The stage does not
//! validate its coefficients: callers clamp frequency and Q before calling
//! [`coefficients`], which rejects anything the formulas cannot handle.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rustfft::num_complex::Complex64;

use crate::error::DspError;

/// Lowest frequency any coefficient formula is fed
pub const MIN_FREQUENCY: f32 = 10.0;

/// Highest frequency as a fraction of the sample rate (just below Nyquist)
pub const MAX_FREQUENCY_RATIO: f32 = 0.49;

/// Smallest Q any coefficient formula is fed
pub const MIN_Q: f32 = 0.01;

/// Maximum number of sections in one [`Cascade`]
pub const MAX_CASCADE: usize = 4;

/// Filter shape for coefficient calculation
///
/// Shelf and peaking shapes carry their gain in dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    LowPass,
    HighPass,
    /// Constant 0 dB peak gain band-pass
    BandPass,
    Notch,
    AllPass,
    LowShelf(f32),
    HighShelf(f32),
    Peaking(f32),
}

/// Clamp a frequency into the range the coefficient formulas accept
#[inline]
pub fn clamp_frequency(frequency: f32, sample_rate: f32) -> f32 {
    frequency
        .min(sample_rate * MAX_FREQUENCY_RATIO)
        .max(MIN_FREQUENCY)
}

/// Clamp a Q value into the range the coefficient formulas accept
#[inline]
pub fn clamp_q(q: f32) -> f32 {
    if q.is_nan() {
        return MIN_Q;
    }
    q.max(MIN_Q)
}

/// Calculate coefficients for one section
///
/// Returns an error instead of NaN coefficients when the frequency is outside
/// (0, Nyquist], Q is not positive, or the sample rate is not positive.
pub fn coefficients(
    shape: Shape,
    frequency: f32,
    q: f32,
    sample_rate: f32,
) -> Result<Coefficients<f32>, DspError> {
    if !(sample_rate > 0.0) {
        return Err(DspError::InvalidSampleRate(sample_rate));
    }
    let invalid = DspError::InvalidCoefficients {
        frequency,
        sample_rate,
    };
    if !(frequency > 0.0) || !(q > 0.0) || !frequency.is_finite() || !q.is_finite() {
        return Err(invalid);
    }

    let fs = sample_rate.hz();
    let f0 = frequency.hz();

    let coeffs = match shape {
        Shape::BandPass => {
            if 2.0 * frequency > sample_rate {
                return Err(invalid);
            }
            return Ok(bandpass_unity_peak(frequency, q, sample_rate));
        }
        Shape::LowPass => Coefficients::<f32>::from_params(Type::LowPass, fs, f0, q),
        Shape::HighPass => Coefficients::<f32>::from_params(Type::HighPass, fs, f0, q),
        Shape::Notch => Coefficients::<f32>::from_params(Type::Notch, fs, f0, q),
        Shape::AllPass => Coefficients::<f32>::from_params(Type::AllPass, fs, f0, q),
        Shape::LowShelf(gain_db) => {
            Coefficients::<f32>::from_params(Type::LowShelf(gain_db), fs, f0, q)
        }
        Shape::HighShelf(gain_db) => {
            Coefficients::<f32>::from_params(Type::HighShelf(gain_db), fs, f0, q)
        }
        Shape::Peaking(gain_db) => {
            Coefficients::<f32>::from_params(Type::PeakingEQ(gain_db), fs, f0, q)
        }
    };

    coeffs.map_err(|_| invalid)
}

/// Band-pass with 0 dB gain at the center frequency
fn bandpass_unity_peak(frequency: f32, q: f32, sample_rate: f32) -> Coefficients<f32> {
    let w0 = 2.0 * PI * frequency as f64 / sample_rate as f64;
    let alpha = w0.sin() / (2.0 * q as f64);
    let a0 = 1.0 + alpha;
    Coefficients {
        b0: (alpha / a0) as f32,
        b1: 0.0,
        b2: (-alpha / a0) as f32,
        a1: (-2.0 * w0.cos() / a0) as f32,
        a2: ((1.0 - alpha) / a0) as f32,
    }
}

/// First-order all-pass with -90° phase at `frequency`
///
/// This is what an LR2 low-pass minus its high-pass sums to.
pub fn first_order_allpass(frequency: f32, sample_rate: f32) -> Coefficients<f32> {
    let t = (PI * frequency as f64 / sample_rate as f64).tan();
    let k = ((t - 1.0) / (t + 1.0)) as f32;
    Coefficients {
        b0: k,
        b1: 1.0,
        b2: 0.0,
        a1: k,
        a2: 0.0,
    }
}

/// Pass-through coefficients
pub fn identity() -> Coefficients<f32> {
    Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    }
}

/// Scale the feed-forward side of a section by a linear gain
pub fn scaled(coeffs: Coefficients<f32>, gain: f32) -> Coefficients<f32> {
    Coefficients {
        b0: coeffs.b0 * gain,
        b1: coeffs.b1 * gain,
        b2: coeffs.b2 * gain,
        ..coeffs
    }
}

/// Complex transfer function of one section at `freq`
pub fn response(coeffs: &Coefficients<f32>, freq: f32, sample_rate: f32) -> Complex64 {
    let w = 2.0 * PI * freq as f64 / sample_rate as f64;
    let z1 = Complex64::from_polar(1.0, -w);
    let z2 = z1 * z1;
    let num = Complex64::new(coeffs.b0 as f64, 0.0) + z1 * coeffs.b1 as f64 + z2 * coeffs.b2 as f64;
    let den = Complex64::new(1.0, 0.0) + z1 * coeffs.a1 as f64 + z2 * coeffs.a2 as f64;
    num / den
}

/// One biquad section with its own delay line
///
/// Owned by exactly one filter stage and one channel. The coefficients are
/// kept next to the runtime filter so the stage can report them back for
/// visualization and copying.
#[derive(Debug, Clone)]
pub struct BiquadStage {
    // DirectForm2Transposed: better numerical stability than DF1
    filter: DirectForm2Transposed<f32>,
    coeffs: Coefficients<f32>,
}

impl Default for BiquadStage {
    fn default() -> Self {
        Self::new()
    }
}

impl BiquadStage {
    /// Create a pass-through stage
    pub fn new() -> Self {
        Self::with_coefficients(identity())
    }

    pub fn with_coefficients(coeffs: Coefficients<f32>) -> Self {
        Self {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
            coeffs,
        }
    }

    /// Replace the coefficients, keeping the delay line
    pub fn set_coefficients(&mut self, coeffs: Coefficients<f32>) {
        self.filter.update_coefficients(coeffs);
        self.coeffs = coeffs;
    }

    pub fn coefficients(&self) -> Coefficients<f32> {
        self.coeffs
    }

    /// Filter one sample
    ///
    /// # Real-time Safety
    /// No allocations, no branches on the sample value.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.filter.run(input)
    }

    /// Advance the delay line with silence on the input
    #[inline]
    pub fn process_zero_input(&mut self) -> f32 {
        self.filter.run(0.0)
    }

    /// Clear the delay line
    pub fn reset(&mut self) {
        self.filter.reset_state();
    }

    pub fn response(&self, freq: f32, sample_rate: f32) -> Complex64 {
        response(&self.coeffs, freq, sample_rate)
    }

    pub fn freq_gain(&self, freq: f32, sample_rate: f32) -> f32 {
        self.response(freq, sample_rate).norm() as f32
    }
}

/// Up to [`MAX_CASCADE`] sections in series followed by a linear gain
#[derive(Debug, Clone)]
pub struct Cascade {
    stages: [BiquadStage; MAX_CASCADE],
    count: usize,
    gain: f32,
}

impl Default for Cascade {
    fn default() -> Self {
        Self::new()
    }
}

impl Cascade {
    /// Create an empty (pass-through) cascade
    pub fn new() -> Self {
        Self {
            stages: core::array::from_fn(|_| BiquadStage::new()),
            count: 0,
            gain: 1.0,
        }
    }

    /// Use `count` copies of the same section
    pub fn set_uniform(&mut self, coeffs: Coefficients<f32>, count: usize) {
        self.count = count.min(MAX_CASCADE);
        for stage in &mut self.stages[..self.count] {
            stage.set_coefficients(coeffs);
        }
    }

    /// Use the given sections in order
    pub fn set_stages(&mut self, coeffs: &[Coefficients<f32>]) {
        self.count = coeffs.len().min(MAX_CASCADE);
        for (stage, c) in self.stages.iter_mut().zip(coeffs) {
            stage.set_coefficients(*c);
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let mut x = input;
        for stage in &mut self.stages[..self.count] {
            x = stage.process(x);
        }
        x * self.gain
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Clear the delay lines of sections `first..`, e.g. ones about to
    /// join the signal path after sitting unused
    pub fn reset_from(&mut self, first: usize) {
        for stage in self.stages.iter_mut().skip(first) {
            stage.reset();
        }
    }

    pub fn response(&self, freq: f32, sample_rate: f32) -> Complex64 {
        self.stages[..self.count]
            .iter()
            .fold(Complex64::new(self.gain as f64, 0.0), |acc, s| {
                acc * s.response(freq, sample_rate)
            })
    }

    pub fn freq_gain(&self, freq: f32, sample_rate: f32) -> f32 {
        self.response(freq, sample_rate).norm() as f32
    }
}

/// Coefficients of one section readable from another thread
///
/// Each field is stored separately, so a reader racing a writer can see a
/// mix of old and new fields. That is acceptable for drawing: the next
/// refresh picks up the consistent set.
#[derive(Debug)]
pub struct AtomicCoefficients {
    b0: AtomicU32,
    b1: AtomicU32,
    b2: AtomicU32,
    a1: AtomicU32,
    a2: AtomicU32,
}

impl Default for AtomicCoefficients {
    fn default() -> Self {
        Self::new(identity())
    }
}

impl AtomicCoefficients {
    pub fn new(coeffs: Coefficients<f32>) -> Self {
        Self {
            b0: AtomicU32::new(coeffs.b0.to_bits()),
            b1: AtomicU32::new(coeffs.b1.to_bits()),
            b2: AtomicU32::new(coeffs.b2.to_bits()),
            a1: AtomicU32::new(coeffs.a1.to_bits()),
            a2: AtomicU32::new(coeffs.a2.to_bits()),
        }
    }

    pub fn store(&self, coeffs: &Coefficients<f32>) {
        self.b0.store(coeffs.b0.to_bits(), Ordering::Relaxed);
        self.b1.store(coeffs.b1.to_bits(), Ordering::Relaxed);
        self.b2.store(coeffs.b2.to_bits(), Ordering::Relaxed);
        self.a1.store(coeffs.a1.to_bits(), Ordering::Relaxed);
        self.a2.store(coeffs.a2.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> Coefficients<f32> {
        Coefficients {
            b0: f32::from_bits(self.b0.load(Ordering::Relaxed)),
            b1: f32::from_bits(self.b1.load(Ordering::Relaxed)),
            b2: f32::from_bits(self.b2.load(Ordering::Relaxed)),
            a1: f32::from_bits(self.a1.load(Ordering::Relaxed)),
            a2: f32::from_bits(self.a2.load(Ordering::Relaxed)),
        }
    }
}

/// Published copy of a [`Cascade`]'s sections for the UI thread
///
/// The audio thread is the only writer. A count of zero means the stage is
/// not in the signal path and responds with unity gain.
#[derive(Debug)]
pub struct CascadeSnapshot {
    stages: [AtomicCoefficients; MAX_CASCADE],
    count: AtomicUsize,
    gain: AtomicU32,
}

impl Default for CascadeSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadeSnapshot {
    pub fn new() -> Self {
        Self {
            stages: core::array::from_fn(|_| AtomicCoefficients::default()),
            count: AtomicUsize::new(0),
            gain: AtomicU32::new(1.0_f32.to_bits()),
        }
    }

    /// Commit the cascade's current sections
    pub fn publish(&self, cascade: &Cascade) {
        for (slot, stage) in self.stages.iter().zip(&cascade.stages[..cascade.count]) {
            slot.store(&stage.coefficients());
        }
        self.gain.store(cascade.gain.to_bits(), Ordering::Relaxed);
        self.count.store(cascade.count, Ordering::Relaxed);
    }

    /// Mark the stage as out of the signal path
    pub fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.gain.store(1.0_f32.to_bits(), Ordering::Relaxed);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed).min(MAX_CASCADE)
    }

    pub fn response(&self, freq: f32, sample_rate: f32) -> Complex64 {
        let gain = f32::from_bits(self.gain.load(Ordering::Relaxed)) as f64;
        self.stages[..self.count()]
            .iter()
            .fold(Complex64::new(gain, 0.0), |acc, s| {
                acc * response(&s.load(), freq, sample_rate)
            })
    }

    pub fn freq_gain(&self, freq: f32, sample_rate: f32) -> f32 {
        self.response(freq, sample_rate).norm() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    /// Reference difference equation, written out independently of the
    /// transposed form used at runtime
    fn reference_impulse(c: &Coefficients<f32>, len: usize) -> Vec<f64> {
        let (b0, b1, b2) = (c.b0 as f64, c.b1 as f64, c.b2 as f64);
        let (a1, a2) = (c.a1 as f64, c.a2 as f64);
        let mut h = vec![0.0; len];
        for n in 0..len {
            let x = |k: usize| if n == k { 1.0 } else { 0.0 };
            let y1 = if n >= 1 { h[n - 1] } else { 0.0 };
            let y2 = if n >= 2 { h[n - 2] } else { 0.0 };
            h[n] = b0 * x(0) + b1 * x(1) + b2 * x(2) - a1 * y1 - a2 * y2;
        }
        h
    }

    fn all_shapes() -> Vec<Shape> {
        vec![
            Shape::LowPass,
            Shape::HighPass,
            Shape::BandPass,
            Shape::Notch,
            Shape::AllPass,
            Shape::LowShelf(6.0),
            Shape::HighShelf(-6.0),
            Shape::Peaking(9.0),
        ]
    }

    #[test]
    fn test_impulse_response_matches_difference_equation() {
        for shape in all_shapes() {
            let c = coefficients(shape, 1000.0, 0.707, SR).unwrap();
            let mut stage = BiquadStage::with_coefficients(c);
            let expected = reference_impulse(&c, 256);
            for (n, want) in expected.iter().enumerate() {
                let x = if n == 0 { 1.0 } else { 0.0 };
                let got = stage.process(x) as f64;
                assert!(
                    (got - want).abs() < 1e-5,
                    "{:?}: sample {} got {} want {}",
                    shape,
                    n,
                    got,
                    want
                );
            }
        }
    }

    #[test]
    fn test_first_sample_is_b0() {
        let c = coefficients(Shape::LowPass, 2000.0, 1.0, SR).unwrap();
        let mut stage = BiquadStage::with_coefficients(c);
        assert!((stage.process(1.0) - c.b0).abs() < 1e-7);
    }

    #[test]
    fn test_lowpass_dc_gain_is_unity() {
        let c = coefficients(Shape::LowPass, 500.0, 0.707, SR).unwrap();
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-3, "dc gain {}", dc);
        assert!(response(&c, 20000.0, SR).norm() < 0.01);
    }

    #[test]
    fn test_bandpass_peak_is_unity() {
        let c = coefficients(Shape::BandPass, 1000.0, 4.0, SR).unwrap();
        let peak = response(&c, 1000.0, SR).norm();
        assert!((peak - 1.0).abs() < 1e-4, "peak {}", peak);
        assert!(response(&c, 100.0, SR).norm() < 0.1);
    }

    #[test]
    fn test_allpass_has_unity_magnitude() {
        let second = coefficients(Shape::AllPass, 800.0, 0.707, SR).unwrap();
        let first = first_order_allpass(800.0, SR);
        for f in [20.0, 200.0, 800.0, 5000.0, 20000.0] {
            assert!((response(&second, f, SR).norm() - 1.0).abs() < 1e-4);
            assert!((response(&first, f, SR).norm() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let c = coefficients(Shape::Peaking(6.0), 1000.0, 1.0, SR).unwrap();
        let db = 20.0 * response(&c, 1000.0, SR).norm().log10();
        assert!((db - 6.0).abs() < 0.1, "center gain {} dB", db);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(coefficients(Shape::LowPass, 0.0, 0.7, SR).is_err());
        assert!(coefficients(Shape::LowPass, 30000.0, 0.7, SR).is_err());
        assert!(coefficients(Shape::LowPass, 1000.0, 0.0, SR).is_err());
        assert!(coefficients(Shape::LowPass, f32::NAN, 0.7, SR).is_err());
        assert!(matches!(
            coefficients(Shape::LowPass, 1000.0, 0.7, 0.0),
            Err(DspError::InvalidSampleRate(_))
        ));
    }

    #[test]
    fn test_clamping_keeps_formulas_finite() {
        let f = clamp_frequency(1.0e6, SR);
        let q = clamp_q(-3.0);
        let c = coefficients(Shape::HighPass, f, q, SR).unwrap();
        let mut stage = BiquadStage::with_coefficients(c);
        for i in 0..1000 {
            assert!(stage.process((i as f32 * 0.1).sin()).is_finite());
        }
        assert_eq!(clamp_frequency(0.0, SR), MIN_FREQUENCY);
    }

    #[test]
    fn test_cascade_response_is_product() {
        let c = coefficients(Shape::LowPass, 1000.0, 0.707, SR).unwrap();
        let mut cascade = Cascade::new();
        cascade.set_uniform(c, 3);
        let single = response(&c, 2000.0, SR).norm();
        let triple = cascade.freq_gain(2000.0, SR) as f64;
        assert!((triple - single.powi(3)).abs() < 1e-5);
    }

    #[test]
    fn test_cascade_gain_and_empty() {
        let mut cascade = Cascade::new();
        assert_eq!(cascade.process(0.25), 0.25);
        cascade.set_gain(-1.0);
        assert_eq!(cascade.process(0.25), -0.25);
    }

    #[test]
    fn test_snapshot_matches_cascade() {
        let mut cascade = Cascade::new();
        cascade.set_stages(&[
            coefficients(Shape::Peaking(4.0), 300.0, 2.0, SR).unwrap(),
            coefficients(Shape::HighShelf(-3.0), 6000.0, 0.707, SR).unwrap(),
        ]);
        let snapshot = CascadeSnapshot::new();
        assert_eq!(snapshot.freq_gain(300.0, SR), 1.0);

        snapshot.publish(&cascade);
        for f in [50.0, 300.0, 1000.0, 8000.0] {
            assert!((snapshot.freq_gain(f, SR) - cascade.freq_gain(f, SR)).abs() < 1e-6);
        }

        snapshot.clear();
        assert_eq!(snapshot.count(), 0);
        assert_eq!(snapshot.freq_gain(300.0, SR), 1.0);
    }

    #[test]
    fn test_reset_clears_ringing() {
        let c = coefficients(Shape::BandPass, 1000.0, 10.0, SR).unwrap();
        let mut stage = BiquadStage::with_coefficients(c);
        stage.process(1.0);
        stage.process(0.0);
        stage.reset();
        assert_eq!(stage.process_zero_input(), 0.0);
    }
}

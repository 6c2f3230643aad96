//! Emphasis Curves
//!
//! Record-industry equalization curves (RIAA and the pre-RIAA disc curves,
//! CD pre-emphasis, FM broadcast) as a single biquad. Each curve is an
//! analog transfer function with up to two zeros and two poles given as time
//! constants,
//!
//! ```text
//!          (1 + s·z1)(1 + s·z2)
//! H(s) = ------------------------
//!          (1 + s·p1)(1 + s·p2)
//! ```
//!
//! mapped to the z-plane with the bilinear transform and normalized to 0 dB
//! at 1 kHz. Reproduction applies `H`, recording applies `1/H`.
//!
//! The disc curves carry an ultrasonic 3.18 µs zero so that their inverse
//! stays proper.

use biquad::Coefficients;

use crate::biquad::response;

/// Time constant of the ultrasonic zero (50 kHz)
const ULTRASONIC_TC: f64 = 3.18e-6;

/// Frequency where every curve is normalized to unity gain
pub const NORMALIZE_FREQ: f32 = 1000.0;

/// Which curve to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmphasisCurve {
    Riaa,
    Columbia,
    Emi,
    Bsi,
    Cd,
    Fm50,
    Fm75,
}

impl EmphasisCurve {
    pub const ALL: [EmphasisCurve; 7] = [
        EmphasisCurve::Riaa,
        EmphasisCurve::Columbia,
        EmphasisCurve::Emi,
        EmphasisCurve::Bsi,
        EmphasisCurve::Cd,
        EmphasisCurve::Fm50,
        EmphasisCurve::Fm75,
    ];

    /// Curve for a parameter value (0 = RIAA), clamped into range
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    /// `(zeros, poles)` time constants in seconds, 0 means absent
    fn time_constants(self) -> ([f64; 2], [f64; 2]) {
        match self {
            EmphasisCurve::Riaa => ([318e-6, ULTRASONIC_TC], [3180e-6, 75e-6]),
            EmphasisCurve::Columbia => ([318e-6, ULTRASONIC_TC], [1590e-6, 100e-6]),
            EmphasisCurve::Emi => ([500e-6, ULTRASONIC_TC], [2500e-6, 70e-6]),
            EmphasisCurve::Bsi => ([353e-6, ULTRASONIC_TC], [3180e-6, 50e-6]),
            EmphasisCurve::Cd => ([15e-6, 0.0], [50e-6, 0.0]),
            EmphasisCurve::Fm50 => ([ULTRASONIC_TC, 0.0], [50e-6, 0.0]),
            EmphasisCurve::Fm75 => ([ULTRASONIC_TC, 0.0], [75e-6, 0.0]),
        }
    }
}

/// Direction of the curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmphasisMode {
    /// Playback: de-emphasis
    Reproduction,
    /// Cutting/broadcast: pre-emphasis
    Recording,
}

impl EmphasisMode {
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            EmphasisMode::Reproduction
        } else {
            EmphasisMode::Recording
        }
    }
}

/// `(1 + s·t1)(1 + s·t2)` as `[c0, c1, c2]` in powers of s
fn polynomial(t: [f64; 2]) -> [f64; 3] {
    [1.0, t[0] + t[1], t[0] * t[1]]
}

/// Bilinear transform of a polynomial in s of the given order (1 or 2)
///
/// The order must be the larger of numerator and denominator degree, so a
/// first-order curve does not pick up a pole at Nyquist.
fn bilinear(p: [f64; 3], k: f64, order: usize) -> [f64; 3] {
    if order < 2 {
        return [p[0] + p[1] * k, p[0] - p[1] * k, 0.0];
    }
    let k2 = k * k;
    [
        p[0] + p[1] * k + p[2] * k2,
        2.0 * p[0] - 2.0 * p[2] * k2,
        p[0] - p[1] * k + p[2] * k2,
    ]
}

/// Biquad coefficients for a curve at a sample rate
pub fn emphasis_coefficients(
    curve: EmphasisCurve,
    mode: EmphasisMode,
    sample_rate: f32,
) -> Coefficients<f32> {
    let (zeros, poles) = curve.time_constants();
    let (num, den) = match mode {
        EmphasisMode::Reproduction => (polynomial(zeros), polynomial(poles)),
        EmphasisMode::Recording => (polynomial(poles), polynomial(zeros)),
    };

    let order = if num[2] == 0.0 && den[2] == 0.0 { 1 } else { 2 };
    let k = 2.0 * sample_rate as f64;
    let b = bilinear(num, k, order);
    let a = bilinear(den, k, order);

    let raw = Coefficients {
        b0: (b[0] / a[0]) as f32,
        b1: (b[1] / a[0]) as f32,
        b2: (b[2] / a[0]) as f32,
        a1: (a[1] / a[0]) as f32,
        a2: (a[2] / a[0]) as f32,
    };

    let reference = response(&raw, NORMALIZE_FREQ, sample_rate).norm() as f32;
    let norm = if reference > 0.0 { 1.0 / reference } else { 1.0 };
    crate::biquad::scaled(raw, norm)
}

/// Gain of the analog prototype at `freq`, normalized at 1 kHz
pub fn analog_gain(curve: EmphasisCurve, mode: EmphasisMode, freq: f32) -> f32 {
    let (zeros, poles) = curve.time_constants();
    let magnitude = |t: [f64; 2], f: f64| -> f64 {
        let w = 2.0 * std::f64::consts::PI * f;
        t.iter().map(|tc| (1.0 + (w * tc).powi(2)).sqrt()).product()
    };
    let gain = |f: f64| magnitude(zeros, f) / magnitude(poles, f);
    let ratio = gain(freq as f64) / gain(NORMALIZE_FREQ as f64);
    match mode {
        EmphasisMode::Reproduction => ratio as f32,
        EmphasisMode::Recording => (1.0 / ratio) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    fn db(x: f32) -> f32 {
        20.0 * x.log10()
    }

    fn digital_gain(c: &Coefficients<f32>, freq: f32) -> f32 {
        response(c, freq, SR).norm() as f32
    }

    #[test]
    fn test_riaa_playback_reference_points() {
        let c = emphasis_coefficients(EmphasisCurve::Riaa, EmphasisMode::Reproduction, SR);
        assert!(db(digital_gain(&c, 1000.0)).abs() < 0.01);
        // Published RIAA table: +13.09 dB at 100 Hz, +19.27 dB at 20 Hz
        assert!((db(digital_gain(&c, 100.0)) - 13.09).abs() < 0.1);
        assert!((db(digital_gain(&c, 20.0)) - 19.27).abs() < 0.1);
    }

    #[test]
    fn test_digital_tracks_analog_below_5k() {
        for curve in EmphasisCurve::ALL {
            for mode in [EmphasisMode::Reproduction, EmphasisMode::Recording] {
                let c = emphasis_coefficients(curve, mode, SR);
                for f in [30.0, 100.0, 500.0, 2000.0, 5000.0] {
                    let digital = db(digital_gain(&c, f));
                    let analog = db(analog_gain(curve, mode, f));
                    assert!(
                        (digital - analog).abs() < 0.5,
                        "{:?} {:?} at {} Hz: {} vs {}",
                        curve,
                        mode,
                        f,
                        digital,
                        analog
                    );
                }
            }
        }
    }

    #[test]
    fn test_recording_is_inverse_of_reproduction() {
        for curve in EmphasisCurve::ALL {
            let play = emphasis_coefficients(curve, EmphasisMode::Reproduction, SR);
            let record = emphasis_coefficients(curve, EmphasisMode::Recording, SR);
            for f in [20.0, 200.0, 2000.0, 15000.0] {
                let product = digital_gain(&play, f) * digital_gain(&record, f);
                assert!((product - 1.0).abs() < 1e-3, "{:?} at {}: {}", curve, f, product);
            }
        }
    }

    #[test]
    fn test_all_curves_stable() {
        for sr in [44100.0, 48000.0, 96000.0] {
            for curve in EmphasisCurve::ALL {
                for mode in [EmphasisMode::Reproduction, EmphasisMode::Recording] {
                    let c = emphasis_coefficients(curve, mode, sr);
                    assert!(c.a2.abs() < 1.0, "{:?} {:?} a2 {}", curve, mode, c.a2);
                    assert!(c.a1.abs() < 1.0 + c.a2, "{:?} {:?} a1 {}", curve, mode, c.a1);
                }
            }
        }
    }

    #[test]
    fn test_from_index_clamps() {
        assert_eq!(EmphasisCurve::from_index(0), EmphasisCurve::Riaa);
        assert_eq!(EmphasisCurve::from_index(99), EmphasisCurve::Fm75);
        assert_eq!(EmphasisMode::from_index(1), EmphasisMode::Recording);
    }
}

//! Level Meter
//!
//! Peak and RMS accumulator for one monitored signal point, with a peak that
//! falls off at a fixed dB-per-second rate and a clip indicator that lights
//! at 0 dBFS and fades out.
//!
//! # Algorithm
//!
//! 1. Every sample: the peak jumps up to `|x|` if larger, the mean square
//!    follows `x²` through a one-pole smoother (~300 ms).
//! 2. Every control tick (or block), `fall(n)` decays the peak and the clip
//!    light by the amount `n` samples of time is worth.

/// Peak falloff in dB per second
const PEAK_FALLOFF_DB_PER_SEC: f32 = 20.0;

/// Time for the clip light to fade to 10%
const CLIP_FADE_SECONDS: f32 = 0.5;

/// RMS integration time in seconds
const RMS_TIME_SECONDS: f32 = 0.3;

/// Level at which the clip indicator lights
pub const CLIP_LEVEL: f32 = 1.0;

/// Peak/RMS meter with falloff and clip indicator
#[derive(Debug, Clone, Copy)]
pub struct VuMeter {
    peak: f32,
    mean_square: f32,
    clip: f32,
    falloff: f32,
    clip_falloff: f32,
    rms_coeff: f32,
}

impl Default for VuMeter {
    fn default() -> Self {
        let mut meter = Self {
            peak: 0.0,
            mean_square: 0.0,
            clip: 0.0,
            falloff: 1.0,
            clip_falloff: 1.0,
            rms_coeff: 1.0,
        };
        meter.set_sample_rate(48000);
        meter
    }
}

impl VuMeter {
    pub fn new(sample_rate: u32) -> Self {
        let mut meter = Self::default();
        meter.set_sample_rate(sample_rate);
        meter
    }

    /// Recompute the per-sample coefficients and clear the readings
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        let sr = sample_rate.max(1) as f32;
        self.falloff = 10.0_f32.powf(-PEAK_FALLOFF_DB_PER_SEC / 20.0 / sr);
        self.clip_falloff = 0.1_f32.powf(1.0 / (CLIP_FADE_SECONDS * sr));
        self.rms_coeff = 1.0 - (-1.0 / (RMS_TIME_SECONDS * sr)).exp();
        self.reset();
    }

    /// Feed one sample
    #[inline]
    pub fn update(&mut self, sample: f32) {
        let level = sample.abs();
        if level > self.peak {
            self.peak = level;
        }
        if level >= CLIP_LEVEL {
            self.clip = 1.0;
        }
        self.mean_square += (sample * sample - self.mean_square) * self.rms_coeff;
    }

    /// Decay the peak and clip light by `samples` worth of time
    pub fn fall(&mut self, samples: u32) {
        if samples == 0 {
            return;
        }
        let n = samples as i32;
        self.peak *= self.falloff.powi(n);
        self.clip *= self.clip_falloff.powi(n);
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn rms(&self) -> f32 {
        self.mean_square.max(0.0).sqrt()
    }

    /// Clip light brightness (1.0 right after clipping, fading to 0)
    pub fn clip(&self) -> f32 {
        self.clip
    }

    pub fn reset(&mut self) {
        self.peak = 0.0;
        self.mean_square = 0.0;
        self.clip = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_maximum() {
        let mut meter = VuMeter::new(48000);
        for x in [0.1, -0.7, 0.3, 0.5] {
            meter.update(x);
        }
        assert!((meter.peak() - 0.7).abs() < 1e-6);
        assert_eq!(meter.clip(), 0.0);
    }

    #[test]
    fn test_peak_falls_20db_per_second() {
        let mut meter = VuMeter::new(48000);
        meter.update(1.0);
        meter.fall(48000);
        assert!((meter.peak() - 0.1).abs() < 1e-3, "got {}", meter.peak());
    }

    #[test]
    fn test_fall_is_independent_of_chunking() {
        let mut a = VuMeter::new(48000);
        let mut b = VuMeter::new(48000);
        a.update(0.8);
        b.update(0.8);
        a.fall(960);
        for _ in 0..20 {
            b.fall(48);
        }
        assert!((a.peak() - b.peak()).abs() < 1e-5);
    }

    #[test]
    fn test_clip_lights_and_fades() {
        let mut meter = VuMeter::new(48000);
        meter.update(1.2);
        assert_eq!(meter.clip(), 1.0);
        meter.fall(24000);
        assert!((meter.clip() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let mut meter = VuMeter::new(48000);
        for _ in 0..96000 {
            meter.update(0.5);
        }
        assert!((meter.rms() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_sample_rate_change_resets() {
        let mut meter = VuMeter::new(48000);
        meter.update(1.5);
        meter.set_sample_rate(96000);
        assert_eq!(meter.peak(), 0.0);
        assert_eq!(meter.clip(), 0.0);
        assert_eq!(meter.rms(), 0.0);
    }
}

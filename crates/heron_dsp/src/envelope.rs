//! Envelope Follower
//!
//! Rectify + one-pole smoothing with separate attack and release
//! coefficients:
//!
//! ```text
//! env += (|x| - env) * coeff      coeff = attack when |x| > env, else release
//! ```
//!
//! A time constant `t` is the time the envelope needs to cover 99% of a
//! step, so `coeff = 1 - 0.01^(1 / (t * sample_rate))`.

/// Fraction of a step left after one time constant
const SETTLE_RESIDUE: f64 = 0.01;

/// One-pole coefficient that settles to within 1% after `time_ms`
pub fn smoothing_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    let samples = (time_ms as f64 * sample_rate as f64 * 0.001).max(1.0);
    (1.0 - (SETTLE_RESIDUE.ln() / samples).exp()) as f32
}

/// Asymmetric attack/release envelope follower
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeFollower {
    envelope: f32,
    attack: f32,
    release: f32,
}

impl Default for EnvelopeFollower {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeFollower {
    /// Create a follower that tracks instantly until times are set
    pub fn new() -> Self {
        Self {
            envelope: 0.0,
            attack: 1.0,
            release: 1.0,
        }
    }

    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32, sample_rate: f32) {
        self.attack = smoothing_coeff(attack_ms, sample_rate);
        self.release = smoothing_coeff(release_ms, sample_rate);
    }

    /// Set both coefficients directly
    pub fn set_coeffs(&mut self, attack: f32, release: f32) {
        self.attack = attack;
        self.release = release;
    }

    pub fn attack_coeff(&self) -> f32 {
        self.attack
    }

    pub fn release_coeff(&self) -> f32 {
        self.release
    }

    /// Feed one sample and return the updated envelope
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let rectified = input.abs();
        let coeff = if rectified > self.envelope {
            self.attack
        } else {
            self.release
        };
        self.envelope += (rectified - self.envelope) * coeff;
        self.envelope
    }

    #[inline]
    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn test_attack_reaches_99_percent_in_attack_time() {
        let mut env = EnvelopeFollower::new();
        env.set_times(10.0, 200.0, SR);

        let attack_samples = (0.010 * SR) as usize;
        for _ in 0..attack_samples - 1 {
            env.process(1.0);
        }
        assert!(env.envelope() < 0.99, "too fast: {}", env.envelope());
        env.process(1.0);
        assert!((env.envelope() - 0.99).abs() < 1e-3, "got {}", env.envelope());
    }

    #[test]
    fn test_release_decays_to_1_percent_in_release_time() {
        let mut env = EnvelopeFollower::new();
        env.set_times(1.0, 50.0, SR);
        for _ in 0..4800 {
            env.process(1.0);
        }
        assert!(env.envelope() > 0.999);

        let release_samples = (0.050 * SR) as usize;
        for _ in 0..release_samples {
            env.process(0.0);
        }
        assert!((env.envelope() - 0.01).abs() < 1e-3, "got {}", env.envelope());
    }

    #[test]
    fn test_attack_and_release_are_independent() {
        let mut fast_attack = EnvelopeFollower::new();
        fast_attack.set_times(1.0, 100.0, SR);
        let mut slow_attack = EnvelopeFollower::new();
        slow_attack.set_times(20.0, 100.0, SR);

        for _ in 0..96 {
            fast_attack.process(1.0);
            slow_attack.process(1.0);
        }
        assert!(fast_attack.envelope() > 0.98);
        assert!(slow_attack.envelope() < 0.4);

        // Same release time: both fall by the same factor per sample
        let (fa, sa) = (fast_attack.envelope(), slow_attack.envelope());
        fast_attack.process(0.0);
        slow_attack.process(0.0);
        let ratio_fast = fast_attack.envelope() / fa;
        let ratio_slow = slow_attack.envelope() / sa;
        assert!((ratio_fast - ratio_slow).abs() < 1e-6);
        assert!((ratio_fast - (1.0 - fast_attack.release_coeff())).abs() < 1e-6);
    }

    #[test]
    fn test_rectifies_negative_input() {
        let mut env = EnvelopeFollower::new();
        env.set_coeffs(1.0, 1.0);
        assert_eq!(env.process(-0.5), 0.5);
        env.reset();
        assert_eq!(env.envelope(), 0.0);
    }
}

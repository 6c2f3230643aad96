//! Bypass Crossfade
//!
//! Switching an effect in or out of the signal path in a single sample
//! clicks. `Bypass` ramps a dry/wet mix factor over a few milliseconds
//! instead, one step per audio frame.

/// Default crossfade time in seconds
pub const DEFAULT_BYPASS_TIME: f32 = 0.005;

/// Click-free dry/wet switch
///
/// A mix factor of 0.0 means fully processed (wet), 1.0 fully bypassed (dry).
#[derive(Debug, Clone, Copy)]
pub struct Bypass {
    mix: f32,
    target: f32,
    delta: f32,
}

impl Default for Bypass {
    fn default() -> Self {
        Self::new()
    }
}

impl Bypass {
    /// Create an engaged (wet) switch with a one-sample ramp
    pub fn new() -> Self {
        Self {
            mix: 0.0,
            target: 0.0,
            delta: 1.0,
        }
    }

    /// Set the crossfade length from a sample rate and a time in seconds
    pub fn init(&mut self, sample_rate: u32, time: f32) {
        let length = (sample_rate as f32 * time).max(1.0);
        self.delta = 1.0 / length;
    }

    /// Request bypass on or off; the mix ramps toward it frame by frame
    pub fn set_bypass(&mut self, bypassed: bool) {
        self.target = if bypassed { 1.0 } else { 0.0 };
    }

    /// Jump straight to the requested state with no crossfade
    pub fn set_now(&mut self, bypassed: bool) {
        self.set_bypass(bypassed);
        self.mix = self.target;
    }

    /// Fully bypassed and not ramping: processing can be skipped entirely
    pub fn is_bypassed(&self) -> bool {
        self.mix >= 1.0 && self.target >= 1.0
    }

    pub fn is_ramping(&self) -> bool {
        self.mix != self.target
    }

    /// Mix factor for the current frame, then advance the ramp
    #[inline]
    pub fn next_mix(&mut self) -> f32 {
        let mix = self.mix;
        if self.mix != self.target {
            let step = if self.mix < self.target { self.delta } else { -self.delta };
            self.mix += step;
            // Snap once within half a step so rounding never strands the ramp
            if (self.target - self.mix).abs() < self.delta * 0.5
                || (step > 0.0) == (self.mix > self.target)
            {
                self.mix = self.target;
            }
        }
        mix
    }

    /// Blend one sample with a mix factor from [`next_mix`](Self::next_mix)
    #[inline]
    pub fn blend(mix: f32, dry: f32, wet: f32) -> f32 {
        wet + (dry - wet) * mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_wet() {
        let mut bypass = Bypass::new();
        assert!(!bypass.is_bypassed());
        let mix = bypass.next_mix();
        assert_eq!(Bypass::blend(mix, 1.0, 0.25), 0.25);
    }

    #[test]
    fn test_ramps_to_dry_over_time() {
        let mut bypass = Bypass::new();
        bypass.init(48000, 0.001); // 48 samples
        bypass.set_bypass(true);

        let mut previous = -1.0;
        for _ in 0..48 {
            let mix = bypass.next_mix();
            assert!(mix > previous, "mix must rise monotonically");
            assert!(mix < 1.0);
            previous = mix;
        }
        assert!(bypass.is_bypassed());
        assert_eq!(bypass.next_mix(), 1.0);
    }

    #[test]
    fn test_set_now_skips_ramp() {
        let mut bypass = Bypass::new();
        bypass.init(48000, 0.005);
        bypass.set_now(true);
        assert!(bypass.is_bypassed());
        assert!(!bypass.is_ramping());
        bypass.set_bypass(false);
        assert!(bypass.is_ramping());
        assert!(!bypass.is_bypassed());
    }
}

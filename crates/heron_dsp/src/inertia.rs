//! Parameter Inertia
//!
//! Smooths a control value toward its target over a number of control-rate
//! ticks so that filter coefficients never jump under listening conditions.
//!
//! # Ramp laws
//!
//! - [`ExponentialRamp`]: multiplies the value by a constant factor every
//!   tick, so a cutoff sweep moves evenly on a logarithmic (musical) scale.
//!   Monotonic, never overshoots, lands exactly on the target.
//! - [`LinearRamp`]: adds a constant step every tick. Used automatically by
//!   the exponential law when start and target are not both positive.

/// A ramp law advancing a value one tick at a time
pub trait Ramp {
    /// Ramp length in ticks
    fn length(&self) -> u32;

    fn set_length(&mut self, length: u32);

    /// Prepare to move from `start` to `end` over `length()` ticks
    fn start_ramp(&mut self, start: f32, end: f32);

    /// Advance `value` by one tick
    fn ramp(&self, value: f32) -> f32;
}

/// Constant additive step per tick
#[derive(Debug, Clone, Copy)]
pub struct LinearRamp {
    length: u32,
    delta: f32,
}

impl LinearRamp {
    pub fn new(length: u32) -> Self {
        Self { length, delta: 0.0 }
    }
}

impl Ramp for LinearRamp {
    fn length(&self) -> u32 {
        self.length
    }

    fn set_length(&mut self, length: u32) {
        self.length = length;
    }

    fn start_ramp(&mut self, start: f32, end: f32) {
        self.delta = (end - start) / self.length.max(1) as f32;
    }

    #[inline]
    fn ramp(&self, value: f32) -> f32 {
        value + self.delta
    }
}

/// Constant multiplicative step per tick
///
/// Falls back to a linear step when the ramp crosses or touches zero, where
/// a geometric progression is undefined.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRamp {
    length: u32,
    factor: f32,
    linear: LinearRamp,
    use_linear: bool,
}

impl ExponentialRamp {
    pub fn new(length: u32) -> Self {
        Self {
            length,
            factor: 1.0,
            linear: LinearRamp::new(length),
            use_linear: false,
        }
    }
}

impl Ramp for ExponentialRamp {
    fn length(&self) -> u32 {
        self.length
    }

    fn set_length(&mut self, length: u32) {
        self.length = length;
        self.linear.set_length(length);
    }

    fn start_ramp(&mut self, start: f32, end: f32) {
        self.use_linear = !(start > 0.0 && end > 0.0);
        if self.use_linear {
            self.linear.start_ramp(start, end);
        } else {
            self.factor = (end / start).powf(1.0 / self.length.max(1) as f32);
        }
    }

    #[inline]
    fn ramp(&self, value: f32) -> f32 {
        if self.use_linear {
            self.linear.ramp(value)
        } else {
            value * self.factor
        }
    }
}

/// Differences below this are treated as converged
pub const INERTIA_EPSILON: f32 = 1.0e-6;

/// A smoothed control value
///
/// `set_inertia()` stores a new destination, `step()` advances one control
/// tick, `get_last()` reads the current value every audio sample.
#[derive(Debug, Clone, Copy)]
pub struct Inertia<R: Ramp> {
    target: f32,
    value: f32,
    count: u32,
    pub ramp: R,
}

impl<R: Ramp> Inertia<R> {
    pub fn new(ramp: R, init_value: f32) -> Self {
        Self {
            target: init_value,
            value: init_value,
            count: 0,
            ramp,
        }
    }

    /// Start moving toward `target`
    ///
    /// Calling this again with the same target does not restart the ramp.
    pub fn set_inertia(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        if self.ramp.length() <= 1 || (target - self.value).abs() <= INERTIA_EPSILON {
            self.set_now(target);
            return;
        }
        self.ramp.start_ramp(self.value, target);
        self.count = self.ramp.length();
    }

    /// Jump to `value` with no smoothing
    pub fn set_now(&mut self, value: f32) {
        self.target = value;
        self.value = value;
        self.count = 0;
    }

    /// Advance one tick
    #[inline]
    pub fn step(&mut self) {
        if self.count > 0 {
            self.count -= 1;
            self.value = self.ramp.ramp(self.value);
            if self.count == 0 {
                self.value = self.target;
            }
        }
    }

    /// Advance one tick and return the new value
    #[inline]
    pub fn get(&mut self) -> f32 {
        self.step();
        self.value
    }

    #[inline]
    pub fn get_last(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Ticks left before the value lands on the target
    pub fn remaining(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.count > 0
    }

    /// Change the ramp length
    ///
    /// A ramp in flight restarts from the current value with the new length,
    /// so the value itself never jumps.
    pub fn set_length(&mut self, length: u32) {
        if length == self.ramp.length() {
            return;
        }
        self.ramp.set_length(length);
        if self.count > 0 {
            if length <= 1 {
                let target = self.target;
                self.set_now(target);
            } else {
                self.ramp.start_ramp(self.value, self.target);
                self.count = length;
            }
        }
    }
}

impl Inertia<ExponentialRamp> {
    pub fn exponential(length: u32, init_value: f32) -> Self {
        Self::new(ExponentialRamp::new(length), init_value)
    }
}

impl Inertia<LinearRamp> {
    pub fn linear(length: u32, init_value: f32) -> Self {
        Self::new(LinearRamp::new(length), init_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_in_ramp_length_steps() {
        for (start, target) in [(20.0, 20000.0), (5000.0, 100.0), (1.0, 1.0001), (0.5, 2.0)] {
            let mut inertia = Inertia::exponential(64, start);
            inertia.set_inertia(target);
            for _ in 0..64 {
                assert!(inertia.active());
                inertia.step();
            }
            assert!(!inertia.active());
            assert!((inertia.get_last() - target).abs() <= INERTIA_EPSILON * target.abs().max(1.0));
        }
    }

    #[test]
    fn test_exponential_is_monotonic_with_even_steps() {
        let (start, target) = (100.0_f32, 8000.0_f32);
        let len = 32;
        let mut inertia = Inertia::exponential(len, start);
        inertia.set_inertia(target);
        let max_log_step = (target / start).ln().abs() / len as f32 + 1e-4;

        let mut prev = inertia.get_last();
        while inertia.active() {
            let next = inertia.get();
            assert!(next >= prev, "must not move backwards");
            assert!(next <= target * (1.0 + 1e-6), "must not overshoot");
            assert!((next / prev).ln().abs() <= max_log_step, "step too large");
            prev = next;
        }
    }

    #[test]
    fn test_falling_ramp_never_undershoots() {
        let mut inertia = Inertia::exponential(16, 10000.0);
        inertia.set_inertia(50.0);
        let mut prev = inertia.get_last();
        for _ in 0..16 {
            let next = inertia.get();
            assert!(next <= prev);
            assert!(next >= 50.0 * (1.0 - 1e-6));
            prev = next;
        }
    }

    #[test]
    fn test_zero_or_one_tick_jumps() {
        for len in [0, 1] {
            let mut inertia = Inertia::exponential(len, 100.0);
            inertia.set_inertia(400.0);
            assert!(!inertia.active());
            assert_eq!(inertia.get_last(), 400.0);
        }
    }

    #[test]
    fn test_same_target_does_not_restart() {
        let mut inertia = Inertia::exponential(20, 100.0);
        inertia.set_inertia(200.0);
        for _ in 0..5 {
            inertia.step();
        }
        let value = inertia.get_last();
        let remaining = inertia.remaining();

        inertia.set_inertia(200.0);
        assert_eq!(inertia.get_last(), value);
        assert_eq!(inertia.remaining(), remaining);
    }

    #[test]
    fn test_length_change_is_continuous() {
        let mut inertia = Inertia::exponential(100, 100.0);
        inertia.set_inertia(1000.0);
        for _ in 0..10 {
            inertia.step();
        }
        let before = inertia.get_last();
        inertia.set_length(20);
        assert_eq!(inertia.get_last(), before, "length change must not jump");
        assert_eq!(inertia.remaining(), 20);
        for _ in 0..20 {
            inertia.step();
        }
        assert_eq!(inertia.get_last(), 1000.0);
    }

    #[test]
    fn test_length_change_to_zero_lands_on_target() {
        let mut inertia = Inertia::exponential(100, 100.0);
        inertia.set_inertia(1000.0);
        inertia.step();
        inertia.set_length(0);
        assert!(!inertia.active());
        assert_eq!(inertia.get_last(), 1000.0);
    }

    #[test]
    fn test_exponential_falls_back_to_linear_through_zero() {
        let mut inertia = Inertia::exponential(4, -1.0);
        inertia.set_inertia(1.0);
        let values: Vec<f32> = (0..4).map(|_| inertia.get()).collect();
        assert!((values[0] - -0.5).abs() < 1e-6);
        assert!((values[1] - 0.0).abs() < 1e-6);
        assert_eq!(values[3], 1.0);
    }

    #[test]
    fn test_linear_ramp() {
        let mut inertia = Inertia::linear(10, 0.0);
        inertia.set_inertia(1.0);
        inertia.step();
        assert!((inertia.get_last() - 0.1).abs() < 1e-6);
        inertia.set_now(0.3);
        assert!(!inertia.active());
        assert_eq!(inertia.target(), 0.3);
    }
}

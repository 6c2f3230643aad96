//! Control-Rate Tick
//!
//! Counts audio samples down and fires once every `N` samples. Modules use it
//! to slice an audio block at control-rate boundaries, so expensive
//! coefficient math (trig, pow) runs a bounded number of times per second no
//! matter how large or small the host's buffers are.

/// Control rate the modules run their smoothing at
pub const CONTROL_RATE_HZ: u32 = 1000;

/// Fires once every `N` samples
///
/// Protocol: call [`get`](Self::get) to size the next run of samples, process
/// them, then call [`elapsed`](Self::elapsed) which reports (and re-arms) the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OncePerN {
    left: u32,
    total: u32,
}

impl OncePerN {
    /// Create a timer with a period of `total` samples (at least 1)
    pub fn new(total: u32) -> Self {
        let total = total.max(1);
        Self { left: total, total }
    }

    /// Period of roughly 1 ms: `ceil(sample_rate / 1000)` samples
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self::new((sample_rate + CONTROL_RATE_HZ - 1) / CONTROL_RATE_HZ)
    }

    /// Reset the countdown to a full period
    pub fn start(&mut self) {
        self.left = self.total;
    }

    pub fn period(&self) -> u32 {
        self.total
    }

    /// Samples left until the next boundary
    pub fn left(&self) -> u32 {
        self.left
    }

    /// How many of `desired` samples may run before the next boundary
    ///
    /// Returns a value in `[1, desired]` for any `desired >= 1` while the
    /// protocol is followed.
    #[inline]
    pub fn get(&mut self, desired: u32) -> u32 {
        debug_assert!(self.left > 0, "elapsed() must be called after get()");
        if desired > self.left {
            let run = self.left;
            self.left = 0;
            return run;
        }
        self.left -= desired;
        desired
    }

    /// True exactly once per period; re-arms the countdown when it fires
    #[inline]
    pub fn elapsed(&mut self) -> bool {
        if self.left == 0 {
            self.left = self.total;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_sample_rate() {
        assert_eq!(OncePerN::for_sample_rate(48000).period(), 48);
        assert_eq!(OncePerN::for_sample_rate(44100).period(), 45);
        assert_eq!(OncePerN::for_sample_rate(500).period(), 1);
        assert_eq!(OncePerN::new(0).period(), 1);
    }

    #[test]
    fn test_get_stays_in_range() {
        let mut timer = OncePerN::new(48);
        for desired in [1_u32, 7, 48, 100, 8192] {
            let mut remaining = desired;
            while remaining > 0 {
                let run = timer.get(remaining);
                assert!(run >= 1 && run <= remaining, "run {} of {}", run, remaining);
                remaining -= run;
                timer.elapsed();
            }
        }
    }

    #[test]
    fn test_fires_floor_total_over_n_times() {
        // Identical whether the host delivers 1 sample or 8192 per callback
        for block in [1_u32, 3, 47, 48, 49, 512, 8192] {
            let mut timer = OncePerN::new(48);
            let total = 10_000_u32;
            let mut fired = 0;
            let mut done = 0;
            while done < total {
                let mut remaining = block.min(total - done);
                done += remaining;
                while remaining > 0 {
                    remaining -= timer.get(remaining);
                    if timer.elapsed() {
                        fired += 1;
                    }
                }
            }
            assert_eq!(fired, total / 48, "block size {}", block);
        }
    }

    #[test]
    fn test_start_rearms() {
        let mut timer = OncePerN::new(10);
        timer.get(7);
        assert_eq!(timer.left(), 3);
        timer.start();
        assert_eq!(timer.left(), 10);
        assert!(!timer.elapsed());
    }
}

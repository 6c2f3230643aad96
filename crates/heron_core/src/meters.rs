//! Meter Publishing
//!
//! A module's monitored signal points (input, output, per band) each run a
//! [`VuMeter`] on the audio thread. After every block the readings are
//! written into the module's output parameters, where the control thread
//! picks them up: the falling peak always, the clip light and the RMS level
//! where the module declares a port for them.

use heron_dsp::VuMeter;

use crate::params::ParamBank;

/// Parameter slots one meter publishes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterSlot {
    pub level: usize,
    pub clip: Option<usize>,
    pub rms: Option<usize>,
}

impl MeterSlot {
    pub fn new(level: usize, clip: Option<usize>) -> Self {
        Self {
            level,
            clip,
            rms: None,
        }
    }

    /// Also publish the RMS level to `rms`
    pub fn with_rms(mut self, rms: usize) -> Self {
        self.rms = Some(rms);
        self
    }
}

/// Fixed set of meters bound to parameter slots
#[derive(Debug, Clone)]
pub struct MeterBank {
    meters: Vec<VuMeter>,
    slots: Vec<MeterSlot>,
}

impl MeterBank {
    pub fn new(slots: Vec<MeterSlot>) -> Self {
        Self {
            meters: vec![VuMeter::default(); slots.len()],
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Recompute falloff constants; clears the readings
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        for meter in &mut self.meters {
            meter.set_sample_rate(sample_rate);
        }
    }

    /// Feed one sample to meter `index`
    #[inline]
    pub fn update(&mut self, index: usize, sample: f32) {
        if let Some(meter) = self.meters.get_mut(index) {
            meter.update(sample);
        }
    }

    /// Decay every meter by `samples` worth of time
    pub fn fall(&mut self, samples: u32) {
        for meter in &mut self.meters {
            meter.fall(samples);
        }
    }

    pub fn meter(&self, index: usize) -> Option<&VuMeter> {
        self.meters.get(index)
    }

    /// Write peak levels, clip lights and RMS levels to the parameter bank
    pub fn publish(&self, params: &ParamBank) {
        for (meter, slot) in self.meters.iter().zip(&self.slots) {
            params.set_raw(slot.level, meter.peak());
            if let Some(clip) = slot.clip {
                params.set_raw(clip, meter.clip());
            }
            if let Some(rms) = slot.rms {
                params.set_raw(rms, meter.rms());
            }
        }
    }

    pub fn reset(&mut self) {
        for meter in &mut self.meters {
            meter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSpec;

    #[test]
    fn test_publish_to_params() {
        let params = ParamBank::new(vec![
            ParamSpec::output("meter_in"),
            ParamSpec::output("clip_in"),
            ParamSpec::output("meter_out"),
        ]);
        let mut meters = MeterBank::new(vec![
            MeterSlot::new(0, Some(1)),
            MeterSlot::new(2, None),
        ]);
        meters.set_sample_rate(48000);

        meters.update(0, 1.5);
        meters.update(1, -0.25);
        meters.update(7, 1.0); // no such meter
        meters.publish(&params);

        assert_eq!(params.get(0), 1.5);
        assert_eq!(params.get(1), 1.0);
        assert_eq!(params.get(2), 0.25);

        meters.fall(48000);
        meters.publish(&params);
        assert!(params.get(0) < 0.2);

        meters.reset();
        meters.publish(&params);
        assert_eq!(params.get(2), 0.0);
    }

    #[test]
    fn test_publish_rms() {
        let params = ParamBank::new(vec![ParamSpec::output("meter"), ParamSpec::output("rms")]);
        let mut meters = MeterBank::new(vec![MeterSlot::new(0, None).with_rms(1)]);
        meters.set_sample_rate(48000);

        // Two seconds of a constant 0.5 settles the mean square
        for _ in 0..96000 {
            meters.update(0, 0.5);
        }
        meters.publish(&params);
        assert_eq!(params.get(0), 0.5);
        assert!((params.get(1) - 0.5).abs() < 1e-3, "rms {}", params.get(1));
    }
}

//! Parameter Bank
//!
//! A fixed-length array of `f32` parameter values shared between the control
//! thread (writes targets, reads meters) and the audio thread (reads targets,
//! writes meters). Each slot is an `AtomicU32` holding the value's bits, so
//! neither side ever blocks.
//!
//! The bank is the clamping layer: `set()` keeps every value inside its
//! declared range, which is what lets the modules skip validation on the
//! audio path.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{CoreError, CoreResult};

/// Static description of one parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, default: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            default,
            min,
            max,
        }
    }

    /// On/off switch (0.0 or 1.0)
    pub fn toggle(name: impl Into<String>, on: bool) -> Self {
        Self::new(name, if on { 1.0 } else { 0.0 }, 0.0, 1.0)
    }

    /// Read-only output (meters, clip lights); never clamped on write
    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, 0.0, 0.0, f32::MAX)
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }
}

/// Lock-free parameter storage
#[derive(Debug)]
pub struct ParamBank {
    specs: Vec<ParamSpec>,
    values: Vec<AtomicU32>,
}

impl ParamBank {
    /// Create a bank with every value at its default
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        let values = specs
            .iter()
            .map(|spec| AtomicU32::new(spec.default.to_bits()))
            .collect();
        Self { specs, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn spec(&self, index: usize) -> Option<&ParamSpec> {
        self.specs.get(index)
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Index of the parameter called `name`
    pub fn find(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|spec| spec.name == name)
    }

    /// Current value, 0.0 for an out-of-range index
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.values
            .get(index)
            .map_or(0.0, |v| f32::from_bits(v.load(Ordering::Relaxed)))
    }

    /// Value rounded to the nearest integer, for enumerated parameters
    #[inline]
    pub fn get_index(&self, index: usize) -> usize {
        self.get(index).round().max(0.0) as usize
    }

    /// Switch parameters: anything above 0.5 is on
    #[inline]
    pub fn get_bool(&self, index: usize) -> bool {
        self.get(index) > 0.5
    }

    /// Store a value clamped to the parameter's range
    ///
    /// Out-of-range indices are ignored.
    pub fn set(&self, index: usize, value: f32) {
        if let (Some(spec), Some(slot)) = (self.specs.get(index), self.values.get(index)) {
            slot.store(spec.clamp(value).to_bits(), Ordering::Relaxed);
        }
    }

    /// Store a value as is (meters and other outputs)
    #[inline]
    pub fn set_raw(&self, index: usize, value: f32) {
        if let Some(slot) = self.values.get(index) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Set a parameter by name, returning its index
    pub fn set_by_name(&self, name: &str, value: f32) -> CoreResult<usize> {
        let index = self
            .find(name)
            .ok_or_else(|| CoreError::UnknownParam(name.to_string()))?;
        self.set(index, value);
        Ok(index)
    }
}

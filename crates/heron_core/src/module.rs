//! Audio Module Interface
//!
//! The lifecycle every module follows and the one per-block entry point the
//! host calls:
//!
//! ```text
//! new() ──▶ set_sample_rate() ──▶ activate() ──▶ process()* ──▶ deactivate()
//!                                     ▲               │
//!                                     └─ params_changed() whenever the host
//!                                        sees parameter values move
//! ```
//!
//! Buffers are planar: one slice per channel. `process()` works on the
//! frame range `[offset, offset + numsamples)` of each slice and leaves the
//! rest untouched.

use std::sync::Arc;

use heron_dsp::{Bypass, DspError, LineGraph};

use crate::error::{CoreError, CoreResult};
use crate::params::ParamBank;

/// Largest channel count any module accepts
pub const MAX_CHANNELS: usize = 8;

/// A real-time audio effect
pub trait AudioModule: Send {
    /// Short identifier ("filter", "equalizer", ...)
    fn name(&self) -> &'static str;

    /// The module's parameter bank, shared with the control thread
    fn params(&self) -> &Arc<ParamBank>;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Must be called before `activate()`; recomputes every rate-dependent
    /// constant
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// Reset ramps, filters and meters to a glitch-free initial state
    fn activate(&mut self);

    fn deactivate(&mut self);

    /// Re-read parameter targets; ramps restart only for values that moved
    fn params_changed(&mut self);

    /// Process `numsamples` frames starting at `offset`
    ///
    /// Input channel `c` is only read if bit `c` of `inputs_mask` is set,
    /// otherwise it is treated as silence. Output channel `c` is only
    /// written if bit `c` of `outputs_mask` is set. Returns a bitmask of
    /// output channels carrying non-silent audio; the host may use it to
    /// skip downstream work.
    ///
    /// # Real-time Safety
    /// No allocations, no locks, no errors.
    fn process(
        &mut self,
        ins: &[&[f32]],
        outs: &mut [&mut [f32]],
        offset: usize,
        numsamples: usize,
        inputs_mask: u32,
        outputs_mask: u32,
    ) -> u32;

    /// Thread-safe handle the UI uses to draw the module's curves
    fn line_graph(&self) -> Option<Arc<dyn LineGraph>> {
        None
    }
}

/// Bitmask with the low `channels` bits set
#[inline]
pub fn channel_mask(channels: usize) -> u32 {
    if channels >= 32 {
        u32::MAX
    } else {
        (1u32 << channels) - 1
    }
}

/// Checked entry point: validates buffer shapes, then processes every frame
/// with all channels present
///
/// For hosts and tests that own plain buffers; the real-time path calls
/// [`AudioModule::process`] directly.
pub fn run_block(
    module: &mut dyn AudioModule,
    ins: &[&[f32]],
    outs: &mut [&mut [f32]],
) -> CoreResult<u32> {
    if ins.len() != module.input_count() {
        return Err(CoreError::ChannelCount {
            got: ins.len(),
            max: module.input_count(),
        });
    }
    if outs.len() != module.output_count() {
        return Err(CoreError::ChannelCount {
            got: outs.len(),
            max: module.output_count(),
        });
    }
    let frames = ins
        .first()
        .map(|c| c.len())
        .or_else(|| outs.first().map(|c| c.len()))
        .unwrap_or(0);
    let lengths = ins.iter().map(|c| c.len()).chain(outs.iter().map(|c| c.len()));
    for got in lengths {
        if got != frames {
            return Err(DspError::BufferSizeMismatch {
                expected: frames,
                got,
            }
            .into());
        }
    }

    let inputs_mask = channel_mask(ins.len());
    let outputs_mask = channel_mask(outs.len());
    Ok(module.process(ins, outs, 0, frames, inputs_mask, outputs_mask))
}

/// Copy inputs to outputs (silence where an input is absent)
pub(crate) fn pass_through(
    ins: &[&[f32]],
    outs: &mut [&mut [f32]],
    start: usize,
    end: usize,
    inputs_mask: u32,
    outputs_mask: u32,
) {
    for (ch, out) in outs.iter_mut().enumerate() {
        if outputs_mask & (1 << ch) == 0 {
            continue;
        }
        match ins.get(ch) {
            Some(input) if inputs_mask & (1 << ch) != 0 => {
                out[start..end].copy_from_slice(&input[start..end])
            }
            _ => out[start..end].fill(0.0),
        }
    }
}

/// Blend already processed outputs with the dry inputs while a bypass
/// crossfade is running
///
/// Output channel `c` takes its dry signal from input `c % ins.len()`.
pub(crate) fn crossfade(
    bypass: &mut Bypass,
    ins: &[&[f32]],
    outs: &mut [&mut [f32]],
    start: usize,
    end: usize,
    inputs_mask: u32,
    outputs_mask: u32,
) {
    if !bypass.is_ramping() {
        if bypass.is_bypassed() {
            pass_through(ins, outs, start, end, inputs_mask, outputs_mask);
        }
        return;
    }
    for i in start..end {
        let mix = bypass.next_mix();
        for (ch, out) in outs.iter_mut().enumerate() {
            if outputs_mask & (1 << ch) == 0 {
                continue;
            }
            let dry = if ins.is_empty() {
                0.0
            } else {
                let src = ch % ins.len();
                if inputs_mask & (1 << src) != 0 {
                    ins[src][i]
                } else {
                    0.0
                }
            };
            out[i] = Bypass::blend(mix, dry, out[i]);
        }
    }
}

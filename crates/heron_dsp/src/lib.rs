//! Heron DSP - Signal Processing Primitives
//!
//! The building blocks the Heron audio modules are assembled from:
//! - BiQuad sections and cascades (RBJ cookbook shapes on the `biquad` crate)
//! - Parameter inertia with exponential and linear ramp laws
//! - The once-per-N control-rate tick
//! - Bypass crossfade, envelope follower, peak/RMS meters
//! - Emphasis (RIAA and friends) curves
//! - FFT spectrum analyzer and the line-graph query surface
//!
//! # Architecture
//!
//! Nothing in the per-sample path allocates, locks or returns errors.
//! Coefficient formulas return [`DspError`] for inputs they cannot handle so
//! that callers can keep the previous coefficients instead of producing NaN.
//! State shared with a UI thread is stored in atomics and read without
//! synchronization; a reader may see values one refresh stale.

pub mod analyzer;
pub mod biquad;
pub mod bypass;
pub mod emphasis;
pub mod envelope;
mod error;
pub mod graph;
pub mod inertia;
pub mod meter;
pub mod timer;

pub use analyzer::{SpectrumAnalyzer, FFT_SIZE, NUM_BINS};
pub use crate::biquad::{
    clamp_frequency, clamp_q, coefficients, BiquadStage, Cascade, CascadeSnapshot, Shape,
    MAX_CASCADE,
};
pub use bypass::Bypass;
pub use emphasis::{emphasis_coefficients, EmphasisCurve, EmphasisMode};
pub use envelope::EnvelopeFollower;
pub use error::DspError;
pub use graph::{
    db_grid, FrequencyResponse, GainScale, GraphGeneration, Gridline, Legend, LineGraph,
    LAYER_CACHE_GRAPH, LAYER_CACHE_GRID, LAYER_REALTIME_GRAPH,
};
pub use inertia::{ExponentialRamp, Inertia, LinearRamp, Ramp};
pub use meter::VuMeter;
pub use timer::OncePerN;

/// Re-exported so dependents can name coefficient sets without a direct
/// `biquad` dependency
pub use ::biquad::Coefficients;

//! DSP Error Types

use thiserror::Error;

/// Errors that can occur while configuring DSP primitives
///
/// None of these are produced on the audio path. Coefficient calculation
/// errors are reported to the caller, which keeps the previously committed
/// coefficients instead of propagating.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid band index: {index} (must be below {count})")]
    InvalidBandIndex { index: usize, count: usize },

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },

    #[error("Invalid band count: {got} (must be {min}-{max})")]
    InvalidBandCount { got: usize, min: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBandIndex { index: 15, count: 12 };
        assert!(err.to_string().contains("15"));
        assert!(err.to_string().contains("12"));

        let err = DspError::InvalidCoefficients {
            frequency: 1000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("1000"));

        let err = DspError::InvalidBandCount { got: 9, min: 2, max: 6 };
        assert!(err.to_string().contains("2-6"));
    }
}

//! Core Error Types

use thiserror::Error;

/// Errors raised while building or configuring a module
///
/// Processing never fails: these only surface from constructors, config
/// parsing and explicit index-checked accessors.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid channel count: {got} (must be 1-{max})")]
    ChannelCount { got: usize, max: usize },

    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    #[error("DSP error: {0}")]
    Dsp(#[from] heron_dsp::DspError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for module construction and configuration
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Config("no bands".into());
        assert!(err.to_string().contains("no bands"));

        let err = CoreError::ChannelCount { got: 9, max: 8 };
        assert!(err.to_string().contains("9"));
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = heron_dsp::DspError::InvalidBandIndex { index: 10, count: 4 };
        let core_err: CoreError = dsp_err.into();
        assert!(matches!(core_err, CoreError::Dsp(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(core_err.to_string().starts_with("JSON error"));
    }
}

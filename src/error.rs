use std::io;
use thiserror::Error;

/// Errors raised by the pitch engine and its audio adapters.
///
/// A missing pitch is not an error: estimators report it as a zero
/// frequency and the shifter passes the chunk through.
#[derive(Error, Debug)]
pub enum PitchError {
    /// Invalid construction parameters
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A chunk did not match the length the component was primed with
    #[error("chunk length changed: expected {expected} samples, got {actual}")]
    ChunkLength { expected: usize, actual: usize },

    /// Resampler construction or processing failure
    #[error("resampling error: {0}")]
    Resample(String),

    /// Audio container/codec failure
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio device failure
    #[error("audio device error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, PitchError>;

impl PitchError {
    pub fn config(msg: impl Into<String>) -> Self {
        PitchError::Config(msg.into())
    }
}

impl From<rubato::ResamplerConstructionError> for PitchError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        PitchError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for PitchError {
    fn from(e: rubato::ResampleError) -> Self {
        PitchError::Resample(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for PitchError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        PitchError::Decode(e.to_string())
    }
}

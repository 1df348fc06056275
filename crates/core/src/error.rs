/// Result alias that carries the custom [`PulseError`] type.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Common error type for the core crate.
///
/// Each pipeline stage reports through its own variant so the orchestrator can
/// tell where a video creation attempt stopped.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// The audio signal could not be analysed (empty buffer, zero sample rate,
    /// non-finite samples).
    #[error("audio analysis failed: {0}")]
    Analysis(String),
    /// The external decoder could not turn the audio file into samples.
    #[error("audio decoding failed: {0}")]
    Decode(String),
    /// The source image is unusable before any frame is synthesised.
    #[error("invalid source image: {0}")]
    InvalidImage(String),
    /// A single frame failed; the whole batch is abandoned.
    #[error("frame {index} could not be synthesised: {reason}")]
    FrameSynthesis { index: usize, reason: String },
    /// Encoding, muxing or writing the final video failed.
    #[error("video assembly failed: {0}")]
    Assembly(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("worker pool could not be created: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl PulseError {
    pub fn analysis<T: Into<String>>(msg: T) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn assembly<T: Into<String>>(msg: T) -> Self {
        Self::Assembly(msg.into())
    }

    pub fn frame<T: Into<String>>(index: usize, reason: T) -> Self {
        Self::FrameSynthesis {
            index,
            reason: reason.into(),
        }
    }

    /// Short name of the pipeline stage the error originated from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Analysis(_) | Self::Decode(_) => "analysis",
            Self::InvalidImage(_) => "image",
            Self::FrameSynthesis { .. } | Self::WorkerPool(_) => "synthesis",
            Self::Assembly(_) => "assembly",
            Self::Config(_) | Self::Json(_) => "config",
            Self::Io(_) => "io",
        }
    }

    /// Message shown to the external caller. Diagnostic detail stays in logs.
    pub fn user_message(&self) -> &'static str {
        "video creation failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_carry_their_index() {
        let err = PulseError::frame(37, "boom");
        assert!(matches!(err, PulseError::FrameSynthesis { index: 37, .. }));
        assert!(format!("{err}").contains("frame 37"));
        assert_eq!(err.stage(), "synthesis");
    }

    #[test]
    fn user_message_hides_details() {
        let err = PulseError::assembly("ffmpeg exited with status 1: codec missing");
        assert_eq!(err.user_message(), "video creation failed");
    }
}

// Error taxonomy for the frame pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by sources, the detector, sinks and the replay path.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input file or capture device could not be opened. The pipeline never starts.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Inference failed for a single frame. Recoverable: the frame is skipped.
    #[error("detection model error: {0}")]
    DetectionModelError(String),

    /// The output artifact could not be opened or appended to.
    #[error("sink write error: {0}")]
    SinkWriteError(String),

    /// The artifact requested for replay does not exist or cannot be read.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Operation on a closed or uninitialised source, sink or pipeline, or on a
    /// frame buffer that cannot be drawn on or encoded.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl PipelineError {
    pub fn source_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::DetectionModelError(msg.into())
    }

    pub fn sink_write<S: Into<String>>(msg: S) -> Self {
        Self::SinkWriteError(msg.into())
    }

    pub fn artifact_not_found<S: Into<String>>(msg: S) -> Self {
        Self::ArtifactNotFound(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Only per-frame detection failures are swallowed at the frame boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DetectionModelError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_detection_errors_are_recoverable() {
        assert!(PipelineError::detection("bad box").is_recoverable());
        assert!(!PipelineError::source_unavailable("x").is_recoverable());
        assert!(!PipelineError::sink_write("x").is_recoverable());
        assert!(!PipelineError::artifact_not_found("x").is_recoverable());
        assert!(!PipelineError::invalid_state("x").is_recoverable());
    }

    #[test]
    fn test_messages_name_the_failure() {
        let err = PipelineError::artifact_not_found("static/files/out.mp4");
        assert_eq!(
            err.to_string(),
            "artifact not found: static/files/out.mp4"
        );
    }
}

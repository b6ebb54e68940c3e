//! Error types for pipeline construction.
//!
//! Only configuration problems detected before the pipeline starts are
//! represented here. Transient failures at runtime (a failed invalidate, a
//! failed send) are not propagated as errors — they are logged and the loop
//! continues, per the pipeline's failure semantics.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("frame rate must be positive, got {0}")]
    NonPositiveFrameRate(f64),

    #[error("buffer depth must be at least 1, got {0}")]
    InvalidBufferDepth(i64),

    #[error("telemetry interval must be positive")]
    InvalidTelemetryInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_clonable_and_displayable() {
        let err = PipelineError::InvalidBufferDepth(-1);
        let cloned = err.clone();
        assert_eq!(err, cloned);
        assert_eq!(err.to_string(), "buffer depth must be at least 1, got -1");
    }
}

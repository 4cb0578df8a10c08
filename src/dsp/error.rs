use thiserror::Error;
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("serial port unavailable: {0}")]
    Ingestion(String),
    #[error("could not decode sample line {line:?}")]
    Decode { line: String },
    #[error("ADC code {code} outside [0, {adc_max}]")]
    CodeOutOfRange { code: i64, adc_max: u32 },
    #[error("insufficient samples: need more than {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("beta band power is zero; window skipped")]
    DegenerateFeature,
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("failed to persist {path}: {reason}")]
    Persistence { path: String, reason: String },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl PipelineError {
    /// Per-sample and per-window conditions the streaming loop skips over.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode { .. }
                | PipelineError::CodeOutOfRange { .. }
                | PipelineError::InsufficientData { .. }
                | PipelineError::DegenerateFeature
        )
    }
    pub fn persistence(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        PipelineError::Persistence {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PipelineError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        PipelineError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for PipelineError {
    fn from(value: image::ImageError) -> Self {
        PipelineError::Plot(value.to_string())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn per_window_errors_are_recoverable() {
        assert!(PipelineError::DegenerateFeature.is_recoverable());
        assert!(PipelineError::Decode { line: "x".into() }.is_recoverable());
        assert!(PipelineError::InsufficientData {
            required: 27,
            actual: 3
        }
        .is_recoverable());
        assert!(!PipelineError::ModelUnavailable("missing".into()).is_recoverable());
        assert!(!PipelineError::Ingestion("gone".into()).is_recoverable());
    }
}

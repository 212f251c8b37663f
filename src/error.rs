//! Error types for the generation service.
//!
//! Every failure in the upload → matting → inference → export chain is
//! converted into one of these variants and surfaced as a structured
//! response at the API boundary. None of them may take the process down
//! or poison the shared model handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Client sent bytes that do not decode as a raster image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The pipeline has not finished its one-time load yet.
    #[error("pipeline not loaded")]
    PipelineNotLoaded,

    /// The vendored pipeline or matting model failed mid-request.
    /// Covers device OOM; fatal for this request only.
    #[error("inference failed: {0}")]
    Inference(anyhow::Error),

    /// The pipeline produced an empty mesh or no texture.
    #[error("export validation failed: {0}")]
    ExportValidation(String),

    /// GLB encoding failed after validation passed.
    #[error("export failed: {0}")]
    Export(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerationError {
    /// True when the client, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, GenerationError::InvalidImage(_))
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        GenerationError::Inference(err)
    }
}

impl From<tokio::task::JoinError> for GenerationError {
    fn from(err: tokio::task::JoinError) -> Self {
        GenerationError::Inference(anyhow::Error::new(err))
    }
}

impl From<image::ImageError> for GenerationError {
    fn from(err: image::ImageError) -> Self {
        GenerationError::InvalidImage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(GenerationError::InvalidImage("truncated".into()).is_client_error());
        assert!(!GenerationError::PipelineNotLoaded.is_client_error());
        assert!(!GenerationError::ExportValidation("empty mesh".into()).is_client_error());
    }

    #[test]
    fn test_image_error_maps_to_invalid_image() {
        let err: GenerationError = image::load_from_memory(b"not an image")
            .unwrap_err()
            .into();
        assert!(matches!(err, GenerationError::InvalidImage(_)));
    }
}

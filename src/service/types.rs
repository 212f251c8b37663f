//! Service layer types

use std::path::PathBuf;

use uuid::Uuid;

/// Request-scoped generation job. Created per upload, discarded once the
/// response is sent; only the output file outlives it.
#[derive(Debug, Clone)]
pub struct InferenceJob {
    pub id: Uuid,
    pub original_name: String,
}

impl InferenceJob {
    pub fn new(original_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
        }
    }
}

/// Successful end-to-end generation result
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub download_url: String,
    pub output_path: PathBuf,
    pub inference_time_secs: f64,
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthResult {
    pub ready: bool,
    pub version: String,
}

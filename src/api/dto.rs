//! REST API request/response data transfer objects

use serde::{Deserialize, Serialize};

/// Inference response
#[derive(Debug, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub status: String,
    /// Path to the generated `.glb` under the `/outputs` mount.
    pub download_url: String,
    /// End-to-end chain duration in seconds.
    pub inference_time: f64,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}

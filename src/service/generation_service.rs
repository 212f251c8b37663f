//! Generation service - core request orchestration
//!
//! Drives one upload through matting, the vendored pipeline, and GLB
//! export. Blocking inference work runs on the blocking pool; the single
//! GPU is guarded by an explicit mutex rather than trusting the execution
//! engine to serialize concurrent submissions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::matting::BackgroundMatting;
use crate::engine::preprocess::decode_image;
use crate::engine::ObjectPipeline;
use crate::error::GenerationError;
use crate::export;
use crate::storage::ArtifactStore;

use super::types::{GenerationOutcome, HealthResult, InferenceJob};

pub struct GenerationService<M: BackgroundMatting, P: ObjectPipeline> {
    matting: Arc<M>,
    pipeline: Arc<P>,
    artifacts: Arc<ArtifactStore>,
    gpu_lock: Mutex<()>,
}

impl<M: BackgroundMatting, P: ObjectPipeline> GenerationService<M, P> {
    pub fn new(matting: Arc<M>, pipeline: Arc<P>, artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            matting,
            pipeline,
            artifacts,
            gpu_lock: Mutex::new(()),
        }
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Full chain: persist upload, matte, generate, export.
    ///
    /// The temp upload is removed on success and failure alike; a failed
    /// chain additionally drops any partial output file.
    pub async fn generate(
        &self,
        image_data: Vec<u8>,
        original_name: &str,
    ) -> Result<GenerationOutcome, GenerationError> {
        if !self.pipeline.is_loaded() {
            return Err(GenerationError::PipelineNotLoaded);
        }

        let job = InferenceJob::new(original_name);
        let start = Instant::now();

        let upload_path = self.artifacts.save_upload(original_name, &image_data)?;
        let output_path = self.artifacts.output_path_for(&upload_path);

        let result = self.run_chain(image_data, output_path.clone()).await;

        self.artifacts.remove_upload(&upload_path);

        match result {
            Ok(()) => {
                let inference_time_secs = start.elapsed().as_secs_f64();
                info!(
                    "Job {} ({}) complete in {:.2}s",
                    job.id, job.original_name, inference_time_secs
                );
                Ok(GenerationOutcome {
                    download_url: self.artifacts.download_url(&output_path),
                    output_path,
                    inference_time_secs,
                })
            }
            Err(e) => {
                warn!("Job {} ({}) failed: {}", job.id, job.original_name, e);
                if output_path.exists() {
                    let _ = std::fs::remove_file(&output_path);
                }
                Err(e)
            }
        }
    }

    async fn run_chain(
        &self,
        image_data: Vec<u8>,
        output_path: PathBuf,
    ) -> Result<(), GenerationError> {
        // Decode + matte
        let matting = self.matting.clone();
        let matte = tokio::task::spawn_blocking(move || {
            let image = decode_image(&image_data)?;
            matting.matte(&image)
        })
        .await??;

        // Generate, one request on the GPU at a time
        let pipeline = self.pipeline.clone();
        let raw = {
            let _gpu = self.gpu_lock.lock().await;
            tokio::task::spawn_blocking(move || {
                let foreground = DynamicImage::ImageRgba8(matte.foreground);
                pipeline.generate_single_object(&foreground, &matte.mask)
            })
            .await??
        };

        // Export
        tokio::task::spawn_blocking(move || export::export_glb(&raw, &output_path)).await??;

        Ok(())
    }

    /// Readiness: the pipeline's one-time load has completed.
    pub fn health(&self) -> HealthResult {
        HealthResult {
            ready: self.pipeline.is_loaded(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

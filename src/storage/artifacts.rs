//! Artifact store
//!
//! The only persistent state of the service: an uploads directory and an
//! outputs directory on the local filesystem. Files are keyed by upload
//! timestamp plus the sanitized original filename and evicted by the
//! cleanup sweeper once stale.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::config::ArtifactsConfig;
use crate::error::GenerationError;

pub struct ArtifactStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &ArtifactsConfig) -> Result<Self, GenerationError> {
        std::fs::create_dir_all(&config.upload_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;

        Ok(Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist an upload as `{unix_secs}_{sanitized_name}` and return its path.
    pub fn save_upload(&self, original_name: &str, data: &[u8]) -> Result<PathBuf, GenerationError> {
        let stem = upload_stem(original_name);
        let path = self.upload_dir.join(&stem);
        std::fs::write(&path, data)?;
        info!("Saved upload to {:?}", path);
        Ok(path)
    }

    /// Remove a temp upload; missing files are not an error.
    pub fn remove_upload(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove upload {:?}: {}", path, e);
            }
        }
    }

    /// Output path for a given upload: same key, `.glb` extension.
    pub fn output_path_for(&self, upload_path: &Path) -> PathBuf {
        let stem = upload_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("object");
        self.output_dir.join(format!("{stem}.glb"))
    }

    /// Download URL under the static `/outputs` mount.
    pub fn download_url(&self, output_path: &Path) -> String {
        let name = output_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        format!("/outputs/{name}")
    }
}

/// `{unix_secs}_{sanitized_original_name}`
fn upload_stem(original_name: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}_{}", secs, sanitize_filename(original_name))
}

/// Strip path components and anything outside `[A-Za-z0-9._-]`.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("upload");

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

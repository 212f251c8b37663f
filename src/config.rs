//! Generation service configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub artifacts: ArtifactsConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Checkout of the vendored generation pipeline. Resolved lazily when
    /// unset, see [`Config::resolve_repo`].
    pub repo_dir: Option<PathBuf>,
    /// Checkpoint tag under `<repo>/checkpoints/`.
    pub tag: String,
    /// Explicit pipeline model path, overrides tag-based resolution.
    pub config_path: Option<PathBuf>,
    pub matting_model: PathBuf,
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Apply environment variable overrides on top of file/default values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(repo) = std::env::var("PIPELINE_REPO") {
            self.pipeline.repo_dir = Some(PathBuf::from(repo));
        }
        if let Ok(tag) = std::env::var("PIPELINE_TAG") {
            self.pipeline.tag = tag;
        }
        if let Ok(config_path) = std::env::var("PIPELINE_CONFIG") {
            self.pipeline.config_path = Some(PathBuf::from(config_path));
        }
        if let Ok(device) = std::env::var("PIPELINE_DEVICE") {
            self.pipeline.device = device;
        }
        if let Ok(dir) = std::env::var("UPLOAD_DIR") {
            self.artifacts.upload_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            self.artifacts.output_dir = PathBuf::from(dir);
        }
    }

    /// Resolve the pipeline repo checkout for manual installs.
    ///
    /// Order: configured path, `../sam-3d-objects` next to the service,
    /// `./sam-3d-objects` in cwd, `/workspace/sam-3d-objects` (RunPod
    /// default).
    pub fn resolve_repo(&self) -> Option<PathBuf> {
        let candidates = [
            self.pipeline.repo_dir.clone(),
            Some(PathBuf::from("../sam-3d-objects")),
            Some(PathBuf::from("sam-3d-objects")),
            Some(PathBuf::from("/workspace/sam-3d-objects")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|candidate| candidate.exists())
            .map(|candidate| candidate.canonicalize().unwrap_or(candidate))
    }

    /// Path of the pipeline model file, either configured explicitly or
    /// derived from the repo checkout and checkpoint tag.
    pub fn pipeline_model_path(&self) -> PathBuf {
        if let Some(ref explicit) = self.pipeline.config_path {
            return explicit.clone();
        }
        let base = self.resolve_repo().unwrap_or_else(|| PathBuf::from("."));
        base.join("checkpoints")
            .join(&self.pipeline.tag)
            .join("pipeline.xml")
    }

    /// Directories the cleanup sweeper is responsible for.
    pub fn swept_dirs(&self) -> Vec<&Path> {
        vec![
            self.artifacts.upload_dir.as_path(),
            self.artifacts.output_dir.as_path(),
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 3000 },
            pipeline: PipelineConfig {
                repo_dir: None,
                tag: "hf".to_string(),
                config_path: None,
                matting_model: PathBuf::from("models/u2net.xml"),
                device: "GPU".to_string(),
            },
            artifacts: ArtifactsConfig {
                upload_dir: PathBuf::from("/tmp/uploads"),
                output_dir: PathBuf::from("outputs"),
            },
            cleanup: CleanupConfig {
                max_age_secs: 3600,
                sweep_interval_secs: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cleanup.max_age_secs, 3600);
        assert_eq!(config.pipeline.tag, "hf");
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let mut config = Config::default();
        config.pipeline.config_path = Some(PathBuf::from("/opt/pipeline.xml"));
        assert_eq!(
            config.pipeline_model_path(),
            PathBuf::from("/opt/pipeline.xml")
        );
    }

    #[test]
    fn test_tag_based_model_path() {
        let mut config = Config::default();
        config.pipeline.tag = "release".to_string();
        let path = config.pipeline_model_path();
        assert!(path.ends_with("checkpoints/release/pipeline.xml"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [server]
            port = 8080

            [pipeline]
            tag = "hf"
            matting_model = "models/u2net.xml"
            device = "CPU"

            [artifacts]
            upload_dir = "/tmp/up"
            output_dir = "/tmp/out"

            [cleanup]
            max_age_secs = 120
            sweep_interval_secs = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cleanup.max_age_secs, 120);
        assert!(config.pipeline.repo_dir.is_none());
    }
}

//! Pipeline runtime
//!
//! Owns the OpenVINO core and the two compiled models (background matting
//! and the vendored generation pipeline). Both are loaded exactly once per
//! process and held for its whole lifetime; every request shares the same
//! handle.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use openvino::{CompiledModel, Core};
use parking_lot::RwLock;
use tracing::info;

use crate::config::Config;

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// OpenVINO CompiledModel methods are thread-safe in C++, but Rust bindings
    /// require &mut self. We bypass this restriction safely.
    pub fn create_infer_request(&self) -> anyhow::Result<openvino::InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

impl Deref for SafeCompiledModel {
    type Target = CompiledModel;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Process-wide model handle.
///
/// `load()` is idempotent and guarded: concurrent callers (startup probes,
/// early requests) observe either "not loaded yet" or the fully loaded
/// state, never a partial one. There is no unload path.
pub struct PipelineRuntime {
    core: Arc<RwLock<SafeCore>>,
    device: String,
    matting_path: PathBuf,
    pipeline_path: PathBuf,

    matting: RwLock<Option<SafeCompiledModel>>,
    pipeline: RwLock<Option<SafeCompiledModel>>,
}

impl PipelineRuntime {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let core = Core::new()?;

        Ok(Self {
            core: Arc::new(RwLock::new(SafeCore(core))),
            device: config.pipeline.device.clone(),
            matting_path: config.pipeline.matting_model.clone(),
            pipeline_path: config.pipeline_model_path(),
            matting: RwLock::new(None),
            pipeline: RwLock::new(None),
        })
    }

    /// One-time model initialization. Compiles both models onto the target
    /// device and allocates their memory there for the process lifetime.
    pub fn load(&self) -> anyhow::Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        // Take the write locks up front so a concurrent load() blocks
        // instead of compiling a second copy.
        let mut matting_guard = self.matting.write();
        let mut pipeline_guard = self.pipeline.write();
        if matting_guard.is_some() && pipeline_guard.is_some() {
            return Ok(());
        }

        let start = Instant::now();
        info!("Loading matting model from {:?}", self.matting_path);
        let matting = self.compile(&self.matting_path)?;

        info!("Loading generation pipeline from {:?}", self.pipeline_path);
        let pipeline = self.compile(&self.pipeline_path)?;

        *matting_guard = Some(matting);
        *pipeline_guard = Some(pipeline);

        info!("Pipeline runtime ready in {:?}", start.elapsed());
        Ok(())
    }

    fn compile(&self, path: &std::path::Path) -> anyhow::Result<SafeCompiledModel> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-UTF-8 model path: {:?}", path))?;

        let mut core = self.core.write();
        let model = core.read_model_from_file(path, "")?;
        let compiled = core.compile_model(&model, self.device.as_str().into())?;
        Ok(SafeCompiledModel(Arc::new(compiled)))
    }

    /// Readiness: both models compiled and resident on the device.
    pub fn is_loaded(&self) -> bool {
        self.matting.read().is_some() && self.pipeline.read().is_some()
    }

    pub fn matting_model(&self) -> anyhow::Result<SafeCompiledModel> {
        self.matting
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("matting model not loaded"))
    }

    pub fn pipeline_model(&self) -> anyhow::Result<SafeCompiledModel> {
        self.pipeline
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation pipeline not loaded"))
    }
}

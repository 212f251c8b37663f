//! Single-Image 3D Asset Generation Service
//!
//! Wraps a pretrained single-image-to-3D pipeline behind a small HTTP API:
//! upload an image, get back a link to a generated `.glb`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use objgen::api::rest::{create_rest_router, AppState};
use objgen::config::Config;
use objgen::engine::{OpenVinoMatting, PipelineRuntime, VendorPipeline};
use objgen::service::GenerationService;
use objgen::storage::{ArtifactStore, CleanupSweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting Generation Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });
    config.apply_env_overrides();

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Device: {}", config.pipeline.device);
    info!("  Pipeline model: {:?}", config.pipeline_model_path());
    info!("  Upload dir: {:?}", config.artifacts.upload_dir);
    info!("  Output dir: {:?}", config.artifacts.output_dir);
    info!("  Cleanup: every {}s, max age {}s",
        config.cleanup.sweep_interval_secs, config.cleanup.max_age_secs);

    // Initialize the pipeline runtime; the actual load happens in the
    // background so /health can report not-ready in the meantime
    let runtime = Arc::new(PipelineRuntime::new(&config)?);
    let load_runtime = runtime.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = load_runtime.load() {
            // The service keeps running and reports unhealthy
            error!("Failed to initialize pipeline: {}", e);
        }
    });

    // Artifact storage
    let artifacts = Arc::new(ArtifactStore::new(&config.artifacts)?);

    // Start the cleanup sweeper
    let sweeper = Arc::new(CleanupSweeper::new(
        config
            .swept_dirs()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect(),
        &config.cleanup,
    ));
    let sweeper_task = sweeper.clone();
    tokio::spawn(async move {
        sweeper_task.run().await;
    });

    // Create generation service
    let matting = Arc::new(OpenVinoMatting::new(runtime.clone()));
    let pipeline = Arc::new(VendorPipeline::new(runtime.clone()));
    let service = Arc::new(GenerationService::new(matting, pipeline, artifacts.clone()));

    // Create REST app state and router
    let app_state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });
    let router = create_rest_router(app_state, artifacts.output_dir());

    // Start REST server
    let port = config.server.port;
    let _server_handle = tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        info!("REST API listening on http://{}", addr);

        let listener = TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, router).await.unwrap();
    });

    info!("Generation Service is up");
    info!("Health: http://localhost:{}/health", port);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    sweeper.shutdown();

    info!("Goodbye!");
    Ok(())
}

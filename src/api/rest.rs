//! Axum REST API handlers

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::matting::BackgroundMatting;
use crate::engine::ObjectPipeline;
use crate::error::GenerationError;
use crate::service::GenerationService;

use super::dto::*;

/// Application state shared across handlers
pub struct AppState<M: BackgroundMatting, P: ObjectPipeline> {
    pub service: Arc<GenerationService<M, P>>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router<M: BackgroundMatting, P: ObjectPipeline>(
    state: Arc<AppState<M, P>>,
    output_dir: &Path,
) -> Router {
    Router::new()
        .route("/api/inference", post(inference_handler::<M, P>))
        .route("/health", get(health_handler::<M, P>))
        // Generated assets, served until the sweeper evicts them
        .nest_service("/outputs", ServeDir::new(output_dir))
        // Middleware
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: &GenerationError) -> ApiError {
    let (status, code) = match err {
        GenerationError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "INVALID_IMAGE"),
        GenerationError::PipelineNotLoaded => (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY"),
        GenerationError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_FAILED"),
        GenerationError::ExportValidation(_) | GenerationError::Export(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED")
        }
        GenerationError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
    };
    (status, Json(ErrorResponse::new(&err.to_string(), code)))
}

/// Accept an image upload, run the generation chain, return the GLB link
async fn inference_handler<M: BackgroundMatting, P: ObjectPipeline>(
    State(state): State<Arc<AppState<M, P>>>,
    mut multipart: Multipart,
) -> Result<Json<InferenceResponse>, ApiError> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut file_name = "upload.png".to_string();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&e.to_string(), "MULTIPART_ERROR")),
        )
    })? {
        let name = field.name().unwrap_or("").to_string();

        if name == "file" {
            // A part without a declared content type is rejected the same
            // as a non-image one
            let content_type = field.content_type().unwrap_or("");
            if !content_type.starts_with("image/") {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new("File must be an image", "NOT_AN_IMAGE")),
                ));
            }
            if let Some(original) = field.file_name() {
                file_name = original.to_string();
            }
            image_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| {
                        (
                            StatusCode::BAD_REQUEST,
                            Json(ErrorResponse::new(&e.to_string(), "READ_ERROR")),
                        )
                    })?
                    .to_vec(),
            );
        }
    }

    let image_data = image_data.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing file field", "MISSING_FILE")),
        )
    })?;

    let outcome = state
        .service
        .generate(image_data, &file_name)
        .await
        .map_err(|e| {
            error!("Inference failed: {}", e);
            error_response(&e)
        })?;

    Ok(Json(InferenceResponse {
        status: "success".to_string(),
        download_url: outcome.download_url,
        inference_time: outcome.inference_time_secs,
    }))
}

/// Readiness probe: 200 only once the one-time model load has completed
async fn health_handler<M: BackgroundMatting, P: ObjectPipeline>(
    State(state): State<Arc<AppState<M, P>>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let health = state.service.health();

    if !health.ready {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("Model not initialized", "NOT_READY")),
        ));
    }

    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        model: "loaded".to_string(),
        version: health.version,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactsConfig;
    use crate::engine::generator::testing::{StubMatting, StubPipeline};
    use crate::storage::ArtifactStore;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    struct TestApp {
        _guard: tempfile::TempDir,
        router: Router,
        upload_dir: std::path::PathBuf,
        output_dir: std::path::PathBuf,
    }

    fn app_with(pipeline: StubPipeline) -> TestApp {
        let guard = tempfile::tempdir().unwrap();
        let upload_dir = guard.path().join("uploads");
        let output_dir = guard.path().join("outputs");
        let artifacts = Arc::new(
            ArtifactStore::new(&ArtifactsConfig {
                upload_dir: upload_dir.clone(),
                output_dir: output_dir.clone(),
            })
            .unwrap(),
        );
        let service = Arc::new(GenerationService::new(
            Arc::new(StubMatting),
            Arc::new(pipeline),
            artifacts,
        ));
        let state = Arc::new(AppState {
            service,
            start_time: Instant::now(),
        });
        let router = create_rest_router(state, &output_dir);
        TestApp {
            _guard: guard,
            router,
            upload_dir,
            output_dir,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(8, 8, image::Rgba([40, 90, 200, 255]));
        let mut cursor = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn multipart_request(file_name: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
        let boundary = "x-test-boundary-91c4";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/inference")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_not_ready_before_load() {
        let app = app_with(StubPipeline::not_loaded());
        let response = app
            .router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_ready_after_load() {
        let app = app_with(StubPipeline::loaded());
        let response = app
            .router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["model"], "loaded");
    }

    #[tokio::test]
    async fn test_inference_happy_path() {
        let app = app_with(StubPipeline::loaded());
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("chair.png", "image/png", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        let url = body["download_url"].as_str().unwrap();
        assert!(url.starts_with("/outputs/"));
        assert!(url.ends_with(".glb"));
        assert!(body["inference_time"].as_f64().unwrap() > 0.0);

        // The referenced file exists and is a parseable GLB
        let file = app.output_dir.join(url.trim_start_matches("/outputs/"));
        let bytes = std::fs::read(&file).unwrap();
        assert!(!bytes.is_empty());
        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        assert!(gltf.meshes().count() >= 1);
        assert!(gltf.images().count() >= 1);
    }

    #[tokio::test]
    async fn test_inference_rejects_non_image_content_type() {
        let app = app_with(StubPipeline::loaded());
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("notes.txt", "text/plain", b"plain text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["code"], "NOT_AN_IMAGE");
    }

    #[tokio::test]
    async fn test_inference_rejects_part_without_content_type() {
        let app = app_with(StubPipeline::loaded());
        let boundary = "x-test-boundary-91c4";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"chair.png\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&png_bytes());
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/api/inference")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "NOT_AN_IMAGE");
    }

    #[tokio::test]
    async fn test_inference_rejects_undecodable_image() {
        let app = app_with(StubPipeline::loaded());
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("broken.png", "image/png", b"truncated"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["code"], "INVALID_IMAGE");

        // No orphaned temp files on either side
        assert!(std::fs::read_dir(&app.upload_dir).unwrap().next().is_none());
        assert!(std::fs::read_dir(&app.output_dir).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_inference_missing_file_field() {
        let app = app_with(StubPipeline::loaded());
        let boundary = "x-test-boundary-91c4";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/inference")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn test_inference_while_not_ready() {
        let app = app_with(StubPipeline::not_loaded());
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("chair.png", "image/png", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

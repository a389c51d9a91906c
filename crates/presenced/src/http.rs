//! HTTP surface: `GET /` and multipart `POST /verify`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        DefaultBodyLimit, Multipart, Request, State,
    },
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::VerifyError;
use crate::pipeline::{Upload, VerificationPipeline, VerificationRequest, VerificationSuccess};
use crate::staging::Role;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Build the service router.
pub fn router(pipeline: Arc<VerificationPipeline>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/verify", post(verify))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(process_time))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Verification server running" }))
}

async fn verify(
    State(pipeline): State<Arc<VerificationPipeline>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerificationSuccess>, VerifyError> {
    let mut multipart = multipart.map_err(|e| VerifyError::InvalidRequest(e.body_text()))?;
    let mut request = VerificationRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "user_identifier" => request.user_identifier = Some(field.text().await.map_err(invalid)?),
            "firstName" => request.first_name = non_empty(field.text().await.map_err(invalid)?),
            "lastName" => request.last_name = non_empty(field.text().await.map_err(invalid)?),
            other => match Role::from_field(other) {
                Some(role) => {
                    let upload = read_upload(field).await?;
                    request.uploads.insert(role, upload);
                }
                None => tracing::debug!(field = other, "ignoring unknown multipart field"),
            },
        }
    }

    pipeline.verify(request).await.map(Json)
}

async fn read_upload(field: Field<'_>) -> Result<Upload, VerifyError> {
    let filename = field.file_name().unwrap_or_default().to_owned();
    let bytes = field.bytes().await.map_err(invalid)?;
    Ok(Upload { filename, bytes })
}

fn invalid(e: impl std::fmt::Display) -> VerifyError {
    VerifyError::InvalidRequest(e.to_string())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Stamp `X-Process-Time` (seconds) and log one line per request.
async fn process_time(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut response = next.run(req).await;

    let elapsed = start.elapsed().as_secs_f64();
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed:.4}")) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_secs = elapsed,
        "request handled"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{spawn_engine, Models};
    use crate::staging::PermanentStore;
    use crate::testing::{png_bytes, FakeMatcher, ScriptedMedia};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "presence-test-boundary";

    fn app(storage: &std::path::Path, scratch: &std::path::Path) -> Router {
        let config = Config {
            storage_root: storage.to_path_buf(),
            scratch_dir: Some(scratch.to_path_buf()),
            ..Config::default()
        };
        let engine = spawn_engine(
            Models {
                landmarks: None,
                matcher: Box::new(FakeMatcher::distance(0.3)),
            },
            Arc::new(ScriptedMedia::silent(10)),
            config.liveness.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        let store = PermanentStore::open(storage).unwrap();
        let max = config.max_upload_bytes;
        router(Arc::new(VerificationPipeline::new(Arc::new(config), engine, store)), max)
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                    );
                }
                Part::File(name, filename, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn verify_request(parts: Vec<Part<'_>>) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/verify")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_running() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let resp = app(storage.path(), scratch.path())
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(PROCESS_TIME_HEADER));
        let body = json_body(resp).await;
        assert_eq!(body["message"], "Verification server running");
    }

    #[tokio::test]
    async fn test_verify_success_over_http() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let req = verify_request(vec![
            Part::Text("user_identifier", "77"),
            Part::Text("firstName", "Ana"),
            Part::Text("lastName", ""),
            Part::File("idCardFront", "front.png", png_bytes(32, 20)),
            Part::File("idCardBack", "back.png", png_bytes(32, 20)),
            Part::File("selfie", "me.png", png_bytes(20, 32)),
            Part::Text("unexpected", "ignored"),
        ]);

        let resp = app(storage.path(), scratch.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["verified"], true);
        assert_eq!(body["distance"], 0.3);
        assert_eq!(body["detector"], "mediapipe-facemesh");
        assert_eq!(body["liveness"]["outcome"], "bypassed_no_detector");
        let front = body["saved_file_paths"]["photos"]["idCardFront"].as_str().unwrap();
        assert!(front.starts_with("Ana_77/photos/idCardFront_"));
        assert!(storage.path().join(front).is_file());
    }

    #[tokio::test]
    async fn test_verify_missing_image_over_http() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let req = verify_request(vec![
            Part::Text("user_identifier", "77"),
            Part::File("idCardFront", "front.png", png_bytes(8, 8)),
            Part::File("idCardBack", "", Vec::new()),
            Part::File("selfie", "me.png", png_bytes(8, 8)),
        ]);

        let resp = app(storage.path(), scratch.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "MISSING_IMAGE_FILES");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_verify_rejects_non_multipart() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/verify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let resp = app(storage.path(), scratch.path()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let storage = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let req = axum::http::Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://example.org")
            .body(Body::empty())
            .unwrap();

        let resp = app(storage.path(), scratch.path()).oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}

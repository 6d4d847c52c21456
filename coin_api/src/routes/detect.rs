use crate::{
    image_codec::{self, ImageCodecError},
    server::SharedState,
    tally::{CoinDetails, CoinTally},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coin_detection::ModelError;
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("No image file found")]
    MissingImageField,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Unable to read the image, please check the file")]
    UndecodableImage(#[source] ImageCodecError),
    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),
    #[error("An error occurred: {0}")]
    Processing(String),
}

impl From<ModelError> for DetectError {
    fn from(err: ModelError) -> Self {
        DetectError::Processing(err.to_string())
    }
}

impl DetectError {
    pub fn status(&self) -> StatusCode {
        match self {
            DetectError::MissingImageField
            | DetectError::EmptyFilename
            | DetectError::UndecodableImage(_) => StatusCode::BAD_REQUEST,
            DetectError::Upload(err) => err.status(),
            DetectError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct DetectResponse {
    success: bool,
    total_count: u64,
    total_value: u64,
    coin_details: CoinDetails,
    image_with_boxes: String,
    message: String,
}

struct ImageUpload {
    file_name: String,
    data: Bytes,
}

pub async fn detect_options() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[instrument(skip(state, multipart))]
pub async fn detect_coins(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, DetectError> {
    let result = process_upload(&state, multipart).await;

    match &result {
        Ok(_) => state.metrics.record_request("ok"),
        Err(err) if err.status().is_client_error() => {
            tracing::warn!("Rejected request: {}", err);
            state.metrics.record_request("rejected");
        }
        Err(err) => {
            tracing::error!("Detection failed: {}", err);
            state.metrics.record_request("error");
        }
    }

    result.map(Json)
}

async fn process_upload(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<DetectResponse, DetectError> {
    let upload = read_image_field(multipart).await?;
    tracing::info!("Received file {} ({} bytes)", upload.file_name, upload.data.len());

    let image = image_codec::decode_rgb(&upload.data).map_err(DetectError::UndecodableImage)?;
    tracing::info!("Image size: {}x{}", image.width(), image.height());
    let image = Arc::new(image);

    let started = Instant::now();
    let detections = state
        .model_service
        .predict(image.clone(), state.detection.confidence_threshold)
        .await?;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64);

    for (i, detection) in detections.iter().enumerate() {
        tracing::debug!(
            "Coin {}: {} (confidence {:.2}%)",
            i + 1,
            detection.class_label,
            detection.confidence * 100.0
        );
    }

    let tally = CoinTally::from(&detections);
    state.metrics.record_coins(&tally);
    tracing::info!(
        "Found {} coins, total value {} baht",
        tally.total_count,
        tally.total_value
    );

    let quality = state.detection.jpeg_quality;
    let image_with_boxes = tokio::task::spawn_blocking(move || {
        let plotted = detections
            .plot(&image)
            .map_err(|e| DetectError::Processing(e.to_string()))?;
        image_codec::encode_jpeg_base64(&plotted, quality)
            .map_err(|e| DetectError::Processing(e.to_string()))
    })
    .await
    .map_err(|e| DetectError::Processing(e.to_string()))??;

    Ok(DetectResponse {
        success: true,
        total_count: tally.total_count,
        total_value: tally.total_value,
        coin_details: tally.details,
        image_with_boxes,
        message: tally.message(),
    })
}

/// Finds the `image` file part. Parts without a filename are form values,
/// not files, and are skipped.
async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ImageUpload, DetectError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!("Request is not a multipart upload: {}", rejection);
            return Err(DetectError::MissingImageField);
        }
    };

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(DetectError::EmptyFilename);
        }

        let data = field.bytes().await?;
        return Ok(ImageUpload { file_name, data });
    }

    Err(DetectError::MissingImageField)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DetectionConfig, server::build_router, telemetry::Metrics};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request},
        Router,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use coin_detection::{BoundingBox, ColorLabel, Detection, Detections, ModelService};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::{io::Cursor, sync::Mutex};
    use tower::ServiceExt;

    const BOUNDARY: &str = "coin-test-boundary";

    struct MockModelService {
        labels: Vec<ColorLabel>,
        detections: Vec<&'static str>,
        last_threshold: Mutex<Option<f32>>,
    }

    impl MockModelService {
        fn new(detections: Vec<&'static str>) -> Self {
            let labels = ["10baht", "1baht", "5baht"]
                .iter()
                .map(|label| ColorLabel {
                    label: label.to_string(),
                    red: 0,
                    green: 255,
                    blue: 0,
                })
                .collect();
            Self {
                labels,
                detections,
                last_threshold: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ModelService for MockModelService {
        fn labels(&self) -> &[ColorLabel] {
            &self.labels
        }

        async fn predict(
            &self,
            _image: Arc<RgbImage>,
            min_confidence: f32,
        ) -> Result<Detections, ModelError> {
            *self.last_threshold.lock().unwrap() = Some(min_confidence);
            let detections = self
                .detections
                .iter()
                .enumerate()
                .map(|(i, label)| Detection {
                    class_id: i,
                    class_label: label.to_string(),
                    confidence: 0.9,
                    bbox: BoundingBox {
                        x1: 2.0 + i as f32,
                        y1: 2.0,
                        x2: 20.0,
                        y2: 20.0,
                    },
                    color: Rgb([0, 255, 0]),
                })
                .collect();
            Ok(Detections::new(detections))
        }
    }

    struct FailingModelService;

    #[async_trait]
    impl ModelService for FailingModelService {
        fn labels(&self) -> &[ColorLabel] {
            &[]
        }

        async fn predict(
            &self,
            _image: Arc<RgbImage>,
            _min_confidence: f32,
        ) -> Result<Detections, ModelError> {
            Err(ModelError::Inference("session exploded".to_string()))
        }
    }

    struct PanickingModelService;

    #[async_trait]
    impl ModelService for PanickingModelService {
        fn labels(&self) -> &[ColorLabel] {
            &[]
        }

        async fn predict(
            &self,
            _image: Arc<RgbImage>,
            _min_confidence: f32,
        ) -> Result<Detections, ModelError> {
            panic!("inference backend crashed")
        }
    }

    fn router(model_service: Arc<dyn ModelService>) -> Router {
        router_with_limit(model_service, 16 * 1024 * 1024)
    }

    fn router_with_limit(model_service: Arc<dyn ModelService>, max_upload_bytes: usize) -> Router {
        let state = SharedState {
            model_service,
            detection: DetectionConfig::default(),
            metrics: Arc::new(Metrics::new().unwrap()),
        };
        build_router(state, max_upload_bytes)
    }

    fn assert_cors_headers(response: &Response) {
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, OPTIONS"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 48, Rgb([40, 40, 40]));
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        data
    }

    fn multipart_request(field_name: &str, file_name: Option<&str>, data: &[u8]) -> Request<Body> {
        let disposition = match file_name {
            Some(file_name) => format!(
                "form-data; name=\"{}\"; filename=\"{}\"",
                field_name, file_name
            ),
            None => format!("form-data; name=\"{}\"", field_name),
        };

        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/detect")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_detect_tallies_coins() {
        let model = Arc::new(MockModelService::new(vec![
            "10baht", "1baht", "5baht", "10baht", "20baht",
        ]));
        let app = router(model.clone());

        let response = app
            .oneshot(multipart_request("image", Some("coins.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors_headers(&response);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["total_count"], 5);
        assert_eq!(body["total_value"], 26);
        assert_eq!(
            body["coin_details"],
            serde_json::json!({ "1baht": 1, "5baht": 1, "10baht": 2 })
        );
        assert_eq!(
            body["message"],
            "Found 5 coins with a total value of 26 baht"
        );
        assert_eq!(*model.last_threshold.lock().unwrap(), Some(0.5));

        let jpeg = STANDARD
            .decode(body["image_with_boxes"].as_str().unwrap())
            .unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let annotated = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((annotated.width(), annotated.height()), (64, 48));
    }

    #[tokio::test]
    async fn test_detect_with_no_coins() {
        let app = router(Arc::new(MockModelService::new(vec![])));

        let response = app
            .oneshot(multipart_request("image", Some("empty.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_count"], 0);
        assert_eq!(body["total_value"], 0);
        assert_eq!(
            body["coin_details"],
            serde_json::json!({ "1baht": 0, "5baht": 0, "10baht": 0 })
        );
        assert!(!body["image_with_boxes"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let app = router(Arc::new(MockModelService::new(vec!["1baht"])));

        let response = app
            .oneshot(multipart_request("photo", Some("coins.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No image file found");
    }

    #[tokio::test]
    async fn test_image_form_value_without_filename_is_missing() {
        let app = router(Arc::new(MockModelService::new(vec!["1baht"])));

        let response = app
            .oneshot(multipart_request("image", None, &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No image file found");
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_missing_image() {
        let app = router(Arc::new(MockModelService::new(vec!["1baht"])));

        let request = Request::builder()
            .method("POST")
            .uri("/detect")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_empty_filename() {
        let app = router(Arc::new(MockModelService::new(vec!["1baht"])));

        let response = app
            .oneshot(multipart_request("image", Some(""), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No file selected");
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let app = router(Arc::new(MockModelService::new(vec!["1baht"])));

        let response = app
            .oneshot(multipart_request(
                "image",
                Some("notes.txt"),
                b"these bytes are not an image",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Unable to read the image, please check the file"
        );
    }

    #[tokio::test]
    async fn test_model_failure_is_internal_error() {
        let app = router(Arc::new(FailingModelService));

        let response = app
            .oneshot(multipart_request("image", Some("coins.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("session exploded"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let app = router_with_limit(Arc::new(MockModelService::new(vec!["1baht"])), 1024);

        let response = app
            .oneshot(multipart_request("image", Some("huge.png"), &[7u8; 4096]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_cors_headers(&response);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal_error() {
        let app = router(Arc::new(PanickingModelService));

        let response = app
            .oneshot(multipart_request("image", Some("coins.png"), &png_bytes()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors_headers(&response);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "An error occurred: inference backend crashed"
        );
    }

    #[tokio::test]
    async fn test_options_is_no_content_regardless_of_headers() {
        let app = router(Arc::new(MockModelService::new(vec![])));

        let plain = Request::builder()
            .method("OPTIONS")
            .uri("/detect")
            .body(Body::empty())
            .unwrap();
        let preflight = Request::builder()
            .method("OPTIONS")
            .uri("/detect")
            .header(header::ORIGIN, "https://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        for request in [plain, preflight] {
            let response = app.clone().oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert_cors_headers(&response);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert!(bytes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_home_page() {
        let app = router(Arc::new(MockModelService::new(vec![])));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Coin Detection API"));
    }

    #[tokio::test]
    async fn test_health_lists_model_classes() {
        let app = router(Arc::new(MockModelService::new(vec![])));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({
                "status": "Available",
                "classes": ["10baht", "1baht", "5baht"]
            })
        );
    }
}

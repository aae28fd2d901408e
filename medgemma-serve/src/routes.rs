use std::time::Duration;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::{header, HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use medgemma_vlm::{blip::image_processor, prompts};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::ApiError;
use crate::schema::{
    ExplanationResponse, ImageExplanationRequest, ImageExplanationResponse, RootResponse,
    TermRequest,
};
use crate::state::AppState;

/// Build the application router.
///
/// # Arguments
///
/// * `state` - The shared model slots.
/// * `cors_origins` - The origins allowed to call the api from a browser.
/// * `max_upload_bytes` - The maximum size of a request body.
pub fn router(state: AppState, cors_origins: &[String], max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/explain-term", post(explain_term))
        .route("/api/explain-image", post(explain_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// CORS policy for the web frontend.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(86400))
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Welcome to the MedGemma Educational App API!".to_string(),
    })
}

async fn explain_term(
    State(state): State<AppState>,
    request: Result<Json<TermRequest>, JsonRejection>,
) -> Result<Json<ExplanationResponse>, ApiError> {
    let Json(request) = request?;
    let term = request.term.trim().to_string();
    if term.is_empty() {
        return Err(ApiError::InvalidInput("The term must not be empty".to_string()));
    }
    log::info!("Processing term: '{term}'");

    let messages = prompts::explain_term(&term);
    let explainer = state.explainer.clone();
    let max_new_tokens = state.max_new_tokens;
    let explanation = tokio::task::spawn_blocking(move || {
        explainer.run(|m| m.generate(&messages, max_new_tokens))
    })
    .await??;

    log::info!(
        "Generated explanation for '{term}': {}...",
        snippet(&explanation)
    );

    Ok(Json(ExplanationResponse { explanation }))
}

async fn explain_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ImageExplanationResponse>, ApiError> {
    let request = read_image_form(multipart?).await?;
    if request.image_file.is_empty() {
        return Err(ApiError::InvalidImage("no image_file provided".to_string()));
    }
    log::info!(
        "Processing image ({} bytes), question: {:?}",
        request.image_file.len(),
        request.question
    );

    let explainer = state.explainer.clone();
    let captioner = state.captioner.clone();
    let max_new_tokens = state.max_new_tokens;
    let response = tokio::task::spawn_blocking(move || {
        let image = image_processor::decode_image(&request.image_file)
            .map_err(|e| ApiError::InvalidImage(e.to_string()))?;

        let image_description = captioner.run(|m| m.caption(&image))?;
        log::info!(
            "{} description: {}",
            captioner.name(),
            snippet(&image_description)
        );

        let answer = match request.question {
            Some(question) => {
                let messages = prompts::image_question(&image_description, &question);
                Some(explainer.run(|m| m.generate(&messages, max_new_tokens))?)
            }
            None => None,
        };

        Ok::<_, ApiError>(ImageExplanationResponse {
            image_description,
            answer,
        })
    })
    .await??;

    Ok(Json(response))
}

// collect the `image_file` and `question` fields, ignoring any other
async fn read_image_form(mut multipart: Multipart) -> Result<ImageExplanationRequest, ApiError> {
    let mut request = ImageExplanationRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image_file" => {
                request.image_file = field.bytes().await?.to_vec();
            }
            "question" => {
                let text = field.text().await?;
                let text = text.trim();
                request.question = (!text.is_empty()).then(|| text.to_string());
            }
            other => log::debug!("ignoring form field {other:?}"),
        }
    }

    Ok(request)
}

fn snippet(text: &str) -> String {
    text.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use medgemma_vlm::{
        chat::{Line, Message},
        ImageCaptioner, TextGenerator, VlmError,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::schema::ErrorBody;
    use crate::state::ModelSlot;

    const BOUNDARY: &str = "medgemma-test-boundary";

    /// Answers with the text of the last message.
    struct EchoGenerator;

    impl TextGenerator for EchoGenerator {
        fn generate(
            &mut self,
            messages: &[Message],
            max_new_tokens: usize,
        ) -> Result<String, VlmError> {
            let text = messages
                .last()
                .and_then(|m| {
                    m.content.iter().find_map(|l| match l {
                        Line::Text { text } => Some(text.clone()),
                        Line::Image => None,
                    })
                })
                .unwrap_or_default();
            Ok(format!("[{max_new_tokens}] {text}"))
        }
    }

    struct SizeCaptioner;

    impl ImageCaptioner for SizeCaptioner {
        fn caption(&mut self, image: &DynamicImage) -> Result<String, VlmError> {
            Ok(format!("a {}x{} scan", image.width(), image.height()))
        }
    }

    fn app_with(explainer_loads: bool) -> Router {
        let state = AppState {
            explainer: Arc::new(ModelSlot::new("MedGemma", move || {
                if explainer_loads {
                    Ok(Box::new(EchoGenerator) as Box<dyn TextGenerator>)
                } else {
                    Err(VlmError::MissingFile("config.json".to_string()))
                }
            })),
            captioner: Arc::new(ModelSlot::new("BLIP", || {
                Ok(Box::new(SizeCaptioner) as Box<dyn ImageCaptioner>)
            })),
            max_new_tokens: 300,
        };
        router(
            state,
            &["http://localhost:3000".to_string()],
            1024 * 1024,
        )
    }

    fn app() -> Router {
        app_with(true)
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 20, 30])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    fn multipart_request(image: Option<&[u8]>, question: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(image) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image_file\"; filename=\"scan.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(image);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(question) = question {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"question\"\r\n\r\n{question}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/explain-image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn term_request(term: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/explain-term")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "term": term }).to_string(),
            ))
            .expect("request")
    }

    #[tokio::test]
    async fn root_welcome() {
        let response = app()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: RootResponse = json_body(response).await;
        assert_eq!(body.message, "Welcome to the MedGemma Educational App API!");
    }

    #[tokio::test]
    async fn explain_term_returns_generation() {
        let response = app()
            .oneshot(term_request("  Tachycardia "))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: ExplanationResponse = json_body(response).await;
        assert_eq!(body.explanation, "[300] Explain the medical term: Tachycardia");
    }

    #[tokio::test]
    async fn explain_term_rejects_blank_term() {
        let response = app().oneshot(term_request("   ")).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorBody = json_body(response).await;
        assert_eq!(body.detail, "The term must not be empty");
    }

    #[tokio::test]
    async fn explain_term_requires_term_field() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/explain-term")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"word":"x"}"#))
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        let body: ErrorBody = json_body(response).await;
        assert!(body.detail.contains("missing field `term`"));
    }

    #[tokio::test]
    async fn explain_term_malformed_json() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/explain-term")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"term": "#))
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = json_body(response).await;
        assert!(!body.detail.is_empty());
    }

    #[tokio::test]
    async fn explain_term_requires_json_content_type() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/explain-term")
            .body(Body::from(r#"{"term":"sepsis"}"#))
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let _: ErrorBody = json_body(response).await;
    }

    #[tokio::test]
    async fn explain_term_model_unavailable() {
        let response = app_with(false)
            .oneshot(term_request("sepsis"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorBody = json_body(response).await;
        assert!(body.detail.starts_with("MedGemma model is not available"));
    }

    #[tokio::test]
    async fn explain_image_description_only() {
        let image = png(32, 16);
        let response = app()
            .oneshot(multipart_request(Some(&image), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body, serde_json::json!({ "image_description": "a 32x16 scan" }));
    }

    #[tokio::test]
    async fn explain_image_with_question() {
        let image = png(8, 8);
        let response = app()
            .oneshot(multipart_request(Some(&image), Some("Is this normal?")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: ImageExplanationResponse = json_body(response).await;
        assert_eq!(body.image_description, "a 8x8 scan");
        assert_eq!(
            body.answer.as_deref(),
            Some("[300] Image description: a 8x8 scan\n\nQuestion: Is this normal?")
        );
    }

    #[tokio::test]
    async fn explain_image_blank_question_is_ignored() {
        let image = png(8, 8);
        let response = app()
            .oneshot(multipart_request(Some(&image), Some("   ")))
            .await
            .expect("response");
        let body: ImageExplanationResponse = json_body(response).await;
        assert!(body.answer.is_none());
    }

    #[tokio::test]
    async fn explain_image_requires_file() {
        let response = app()
            .oneshot(multipart_request(None, Some("What is this?")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn explain_image_rejects_undecodable_file() {
        let response = app()
            .oneshot(multipart_request(Some(b"not an image"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = json_body(response).await;
        assert!(body.detail.starts_with("Invalid image"));
    }

    #[tokio::test]
    async fn explain_image_requires_multipart() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/explain-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let _: ErrorBody = json_body(response).await;
    }

    #[tokio::test]
    async fn explain_image_over_upload_limit() {
        let image = vec![0u8; 2 * 1024 * 1024];
        let response = app()
            .oneshot(multipart_request(Some(&image), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: ErrorBody = json_body(response).await;
        assert_eq!(body.detail, "The request body is too large");
    }

    #[tokio::test]
    async fn explain_image_question_without_explainer() {
        let image = png(8, 8);
        let response = app_with(false)
            .oneshot(multipart_request(Some(&image), Some("Why?")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn cors_preflight_for_frontend() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/explain-term")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .expect("request");
        let response = app().oneshot(request).await.expect("response");

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("http://localhost:3000"))
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            Some(&HeaderValue::from_static("true"))
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_MAX_AGE),
            Some(&HeaderValue::from_static("86400"))
        );
    }

    #[tokio::test]
    async fn cors_rejects_unknown_origin() {
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .header(header::ORIGIN, "https://evil.example.com")
            .body(Body::empty())
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}

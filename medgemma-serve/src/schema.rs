use serde::{Deserialize, Serialize};

/// Body of `POST /api/explain-term`.
#[derive(Debug, Deserialize, Serialize)]
pub struct TermRequest {
    pub term: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExplanationResponse {
    pub explanation: String,
}

/// Multipart form of `POST /api/explain-image`.
#[derive(Debug, Default)]
pub struct ImageExplanationRequest {
    /// Encoded image from the `image_file` field.
    pub image_file: Vec<u8>,
    /// Optional question from the `question` field, `None` when blank.
    pub question: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImageExplanationResponse {
    pub image_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// Error body, shaped like the `detail` field the frontend reads.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

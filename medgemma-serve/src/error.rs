use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use medgemma_vlm::VlmError;

use crate::schema::ErrorBody;

/// Errors returned by the request handlers.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The request is well formed but its content is not usable.
    #[error("{0}")]
    InvalidInput(String),

    /// The uploaded image is missing or cannot be decoded.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The request body is over the upload limit.
    #[error("The request body is too large")]
    PayloadTooLarge,

    /// The request could not be extracted, with the status chosen by axum.
    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },

    /// The model could not be loaded, even after a retry.
    #[error("{0} model is not available or failed to load. Please check backend logs.")]
    ModelUnavailable(String),

    /// The model failed while generating.
    #[error("Could not generate a response due to an internal issue. Please check backend logs.")]
    Inference(#[source] VlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Rejected { status, .. } => *status,
            ApiError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inference(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ApiError {
    fn rejected(status: StatusCode, detail: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::Rejected { status, detail }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Inference(e) => log::error!("inference failed: {e}"),
            ApiError::Internal(e) => log::error!("internal error: {e}"),
            _ => log::warn!("{self}"),
        }

        let body = ErrorBody {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

use crate::multipart::ParseError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::{DetectError, Detection};
use serde::Serialize;
use thiserror::Error;

pub const NO_DETECTIONS_MESSAGE: &str = "No varroa mites detected";
pub const SUCCESS_MESSAGE: &str = "File processed successfully";

/// Body of a successful upload. `count` always equals `result.len()`.
#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub message: &'static str,
    pub result: Vec<Detection>,
    pub count: usize,
}

impl DetectionResponse {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        let message = if detections.is_empty() {
            NO_DETECTIONS_MESSAGE
        } else {
            SUCCESS_MESSAGE
        };

        Self {
            message,
            count: detections.len(),
            result: detections,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

/// Every way an upload can fail, rendered as `{"message": ...}`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unsupported content type. Please use multipart/form-data.")]
    UnsupportedContentType,
    #[error("Missing boundary in multipart/form-data")]
    MissingBoundary,
    #[error("Empty request body")]
    EmptyBody,
    #[error("Missing 'file' field in form data")]
    MissingFileField,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Unable to decode image")]
    UndecodableImage,
    #[error("Model initialization failed")]
    ModelUnavailable,
    #[error("Server busy, retry later")]
    Busy,
    #[error("Detection failed")]
    DetectionFailed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::MissingBoundary
            | ApiError::EmptyBody
            | ApiError::MissingFileField
            | ApiError::NoFileSelected => StatusCode::BAD_REQUEST,
            ApiError::UndecodableImage => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ModelUnavailable | ApiError::DetectionFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::MissingBoundary => ApiError::MissingBoundary,
            ParseError::MissingFileField => ApiError::MissingFileField,
            ParseError::EmptyBody => ApiError::EmptyBody,
        }
    }
}

impl From<DetectError> for ApiError {
    fn from(e: DetectError) -> Self {
        match e {
            DetectError::ModelUnavailable(_) => ApiError::ModelUnavailable,
            DetectError::Decode(_) => ApiError::UndecodableImage,
            DetectError::InvalidParams(_) | DetectError::Inference(_) => ApiError::DetectionFailed,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

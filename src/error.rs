//! Error types shared by the storage layer and the tus handlers.
//!
//! Every variant maps onto one HTTP status through `ResponseError`, so a
//! storage error can be returned from a handler with `?` and reaches the
//! client unchanged.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

/// Errors produced by data stores, decorators and request handlers.
#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("file currently locked")]
    FileLocked,

    #[error("feature not implemented")]
    NotImplemented,

    #[error("unsupported version")]
    UnsupportedVersion,

    #[error("maximum size exceeded")]
    MaxSizeExceeded,

    #[error("resource's size exceeded")]
    SizeExceeded,

    #[error("mismatched offset")]
    MismatchOffset,

    #[error("missing or invalid Content-Type header")]
    InvalidContentType,

    #[error("missing or invalid Upload-Length header")]
    InvalidUploadLength,

    #[error("missing or invalid Upload-Offset header")]
    InvalidOffset,

    #[error("invalid Upload-Concat header")]
    InvalidConcat,

    #[error("one of the partial uploads is not finished")]
    UploadNotFinished,

    #[error("modifying a final upload is not allowed")]
    ModifyFinal,

    #[error("data store lacks the required {0} capability")]
    CapabilityRequired(&'static str),

    #[error("failed to read request body: {0}")]
    Payload(#[from] actix_web::error::PayloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for storage and handler operations.
pub type TusResult<T> = std::result::Result<T, TusError>;

impl ResponseError for TusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::FileLocked => StatusCode::LOCKED,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::UnsupportedVersion => StatusCode::PRECONDITION_FAILED,
            Self::MaxSizeExceeded | Self::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MismatchOffset => StatusCode::CONFLICT,
            Self::InvalidContentType
            | Self::InvalidUploadLength
            | Self::InvalidOffset
            | Self::InvalidConcat
            | Self::UploadNotFinished
            | Self::Payload(_) => StatusCode::BAD_REQUEST,
            Self::ModifyFinal => StatusCode::FORBIDDEN,
            Self::CapabilityRequired(_) | Self::Io(_) | Self::Serde(_) | Self::Backend(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // The version precondition answers with an empty body.
        if let Self::UnsupportedVersion = self {
            return HttpResponse::build(self.status_code()).finish();
        }
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

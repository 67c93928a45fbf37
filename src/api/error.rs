use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::errors::ApprovalError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        ApiError::NotFound(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let error_kind = match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "permission_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone(_) => "expired",
            ApiError::BadGateway(_) => "upstream_failure",
            ApiError::Internal(_) => "internal_error",
        };

        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::BadGateway(msg)
            | ApiError::Internal(msg) => msg,
        };

        (status, Json(ErrorBody { error: error_kind, message })).into_response()
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        let message = err.to_string();
        match err {
            ApprovalError::NotFound { .. } => ApiError::NotFound(message),
            ApprovalError::PermissionDenied { .. } => ApiError::Forbidden(message),
            ApprovalError::Conflict { .. } => ApiError::Conflict(message),
            ApprovalError::Expired { .. } => ApiError::Gone(message),
            ApprovalError::Upstream { .. } => ApiError::BadGateway(message),
            ApprovalError::Invalid { .. } => ApiError::BadRequest(message),
            ApprovalError::Storage { .. }
            | ApprovalError::Serialization { .. }
            | ApprovalError::Config { .. }
            | ApprovalError::Internal { .. } => {
                tracing::error!(error = %message, kind = err.kind(), "Request failed");
                ApiError::Internal("internal error".to_string())
            }
        }
    }
}

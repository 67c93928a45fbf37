//! # Error Types
//!
//! Error taxonomy for the approval workflow using `thiserror`.

use axum::http::StatusCode;

/// Custom result type for approval workflow operations
pub type Result<T> = std::result::Result<T, ApprovalError>;

/// Main error type for the approval workflow
#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    /// Role, request or issue absent
    #[error("{resource_type} '{id}' not found")]
    NotFound { resource_type: String, id: String },

    /// Identity or role outside the bound set, insufficient approvals, caller mismatch
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Exclusive lease still active, or a concurrent writer won the race
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Request past its approval window
    #[error("request '{nonce}' for role '{role}' has expired")]
    Expired { role: String, nonce: String },

    /// Downstream call, identity resolution or notification failed
    #[error("{operation} against {target} failed: {message}")]
    Upstream { operation: String, target: String, message: String },

    /// Malformed role, request or config fields
    #[error("invalid input: {message}")]
    Invalid { message: String, field: Option<String> },

    /// Key-value store failures
    #[error("storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Process configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Internal errors
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApprovalError {
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn expired<R: Into<String>, N: Into<String>>(role: R, nonce: N) -> Self {
        Self::Expired { role: role.into(), nonce: nonce.into() }
    }

    /// Create an upstream error. `message` must never carry secret material.
    pub fn upstream<O, T, M>(operation: O, target: T, message: M) -> Self
    where
        O: Into<String>,
        T: Into<String>,
        M: Into<String>,
    {
        Self::Upstream {
            operation: operation.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into(), field: None }
    }

    pub fn invalid_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Invalid { message: message.into(), field: Some(field.into()) }
    }

    pub fn storage<S: Into<String>>(context: S) -> Self {
        Self::Storage { context: context.into(), source: None }
    }

    pub fn storage_with_source<S: Into<String>>(
        context: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Storage { context: context.into(), source: Some(source) }
    }

    pub fn serialization<S: Into<String>>(context: S, source: serde_json::Error) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// HTTP status the error maps to when surfaced through the API
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Expired { .. } => StatusCode::GONE,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Invalid { .. } => StatusCode::BAD_REQUEST,
            Self::Storage { .. }
            | Self::Serialization { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used in API error bodies and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Conflict { .. } => "conflict",
            Self::Expired { .. } => "expired",
            Self::Upstream { .. } => "upstream_failure",
            Self::Invalid { .. } => "invalid",
            Self::Storage { .. } => "storage_error",
            Self::Serialization { .. } => "serialization_error",
            Self::Config { .. } => "config_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the caller may retry with the same nonce
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Storage { .. } | Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for ApprovalError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("JSON serialization failed", err)
    }
}

impl From<sqlx::Error> for ApprovalError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage_with_source("database operation failed", Box::new(err))
    }
}

impl From<reqwest::Error> for ApprovalError {
    fn from(err: reqwest::Error) -> Self {
        let target = err.url().map(|u| u.host_str().unwrap_or_default().to_string()).unwrap_or_default();
        Self::upstream("http", target, err.without_url().to_string())
    }
}

impl From<validator::ValidationErrors> for ApprovalError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        let mut first_field = None;
        for (field, field_errors) in errors.field_errors() {
            if first_field.is_none() {
                first_field = Some(field.to_string());
            }
            for error in field_errors {
                match &error.message {
                    Some(message) => messages.push(message.to_string()),
                    None => messages.push(format!("bad {}", field)),
                }
            }
        }
        messages.sort();
        Self::Invalid { message: messages.join("; "), field: first_field }
    }
}

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::models::UnknownProgram;
use crate::query::QueryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    UnknownProgram(#[from] UnknownProgram),
    #[error("{message}")]
    Query {
        message: String,
        #[source]
        source: QueryError,
    },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnknownProgram(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Query { .. } | AppError::Config(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Extractor rejections are reported as 400s inside the envelope.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Attaches a user-facing message to a failed query.
pub trait QueryContext<T> {
    fn context(self, message: &str) -> Result<T, AppError>;
}

impl<T> QueryContext<T> for Result<T, QueryError> {
    fn context(self, message: &str) -> Result<T, AppError> {
        self.map_err(|source| AppError::Query {
            message: message.to_string(),
            source,
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Query { message, source } => {
                tracing::error!(error = %source, "{message}");
                ApiResponse::<()>::failure(message.clone(), Some(source.to_string()))
            }
            AppError::Config(_) | AppError::Io(_) => {
                tracing::error!(error = %self, "request failed");
                ApiResponse::<()>::failure("Internal server error", Some(self.to_string()))
            }
            _ => ApiResponse::<()>::failure(self.to_string(), None),
        };
        (status, Json(body)).into_response()
    }
}

/// The `{ success, data?, message?, error? }` body every JSON route returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(UnknownProgram("mba".into())).status(),
            StatusCode::BAD_REQUEST
        );
        let query: Result<(), QueryError> = Err(QueryError::Database("gone".into()));
        assert_eq!(
            query.context("Error fetching data").unwrap_err().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let ok = serde_json::to_value(ApiResponse::ok(json!([1, 2]))).expect("serializes");
        assert_eq!(ok, json!({ "success": true, "data": [1, 2] }));

        let failed = serde_json::to_value(ApiResponse::failure("Event not found", None))
            .expect("serializes");
        assert_eq!(failed, json!({ "success": false, "message": "Event not found" }));
    }
}

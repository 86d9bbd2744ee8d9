//! API error type and JSON error envelope.
//!
//! Every failed request answers with
//! `{"error": "<message>", "code": "<code>", "details"?: {"<field>": [...]}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::EngineError;

/// Field name to the messages reported for it
pub type FieldErrors = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Gone,
    TooManyRequests,
    ValidationError,
    InternalError,
    DatabaseError,
    ExternalServiceError,
}

impl ErrorCode {
    fn meta(self) -> (StatusCode, &'static str) {
        use ErrorCode::*;
        match self {
            BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
            Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Conflict => (StatusCode::CONFLICT, "conflict"),
            Gone => (StatusCode::GONE, "gone"),
            TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            ValidationError => (StatusCode::BAD_REQUEST, "validation_error"),
            InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            DatabaseError => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            ExternalServiceError => (StatusCode::BAD_GATEWAY, "external_service_error"),
        }
    }

    pub fn status_code(self) -> StatusCode {
        self.meta().0
    }

    pub fn as_str(self) -> &'static str {
        self.meta().1
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<FieldErrors>,
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Authenticated, but the role does not allow it
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Used, revoked or expired link
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Gone, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    /// Validation failure. A single message is promoted to the top-level error.
    pub fn validation(errors: FieldErrors) -> Self {
        let message = match errors.len() {
            1 => errors
                .values()
                .flat_map(|msgs| msgs.first())
                .next()
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string()),
            n => format!("Validation failed for {} fields", n),
        };
        Self {
            code: ErrorCode::ValidationError,
            message,
            details: Some(errors),
        }
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(HashMap::from([(field.to_string(), vec![message.into()])]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.code.meta();
        let body = ErrorBody {
            error: self.message,
            code,
            details: self.details,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return ApiError::not_found("Resource not found");
        }

        tracing::error!(error = %err, "Database error");
        let constraint = match &err {
            sqlx::Error::Database(db_err) => Some(db_err.message().to_string()),
            _ => None,
        };
        match constraint.as_deref() {
            Some(m) if m.contains("UNIQUE constraint failed") => {
                ApiError::conflict("A record with this identifier already exists")
            }
            Some(m) if m.contains("FOREIGN KEY constraint failed") => {
                ApiError::bad_request("Referenced record does not exist")
            }
            _ => ApiError::new(ErrorCode::DatabaseError, "A database error occurred"),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Database(e) => e.into(),
            EngineError::NotFound(what) => ApiError::not_found(format!("{} not found", capitalize(what))),
            EngineError::Scheduler(msg) => {
                tracing::error!(error = %msg, "Scheduler error");
                ApiError::new(ErrorCode::ExternalServiceError, "Message scheduler request failed")
            }
            EngineError::InvalidDate(d) => ApiError::validation_field("date", format!("Invalid date: {}", d)),
            EngineError::InvalidState(s) => {
                tracing::error!(status = %s, "Unexpected record state");
                ApiError::internal("Unexpected record state")
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Collects field errors across several checks
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `Result`-returning validator, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(msg) = result {
            self.add(field, msg);
        }
        self
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorCode::ValidationError.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Gone.status_code(), StatusCode::GONE);
        assert_eq!(ErrorCode::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::ExternalServiceError.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_builder_collects_fields() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("full_name", "Name is required");
        builder.add("email", "Invalid email format");
        builder.add("full_name", "Name is too short");

        let err = builder.finish().unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("2 fields"));
        assert_eq!(err.details.unwrap()["full_name"].len(), 2);

        assert!(ValidationErrorBuilder::new().finish().is_ok());
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = EngineError::NotFound("payment").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Payment not found");

        let err: ApiError = EngineError::Scheduler("timeout".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_response_shape() {
        let response = ApiError::validation_field("email", "Invalid email format").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Invalid email format");
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["details"]["email"][0], "Invalid email format");

        let bytes = ApiError::conflict("taken")
            .into_response()
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("details").is_none());
    }
}

//! HTTP error responses
//!
//! Every handler failure is an [`ApiError`] serialized as JSON with the
//! status code its [`ErrorCode`] maps to.

use crate::scheduler::SchedulerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use xnode_core::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Flow failed validation
    ValidationFailed,

    /// Request body could not be used
    InvalidInput,

    TaskNotFound,

    /// Operation conflicts with the task's current state
    StateConflict,

    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::TaskNotFound => StatusCode::NOT_FOUND,
            ErrorCode::StateConflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task {} not found", task_id))
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::Rejected { errors } => ApiError::validation_failed(message)
                .with_details(serde_json::json!({ "errors": errors })),
            ValidationError::CycleDetected { nodes } => ApiError::validation_failed(message)
                .with_details(serde_json::json!({ "nodes": nodes })),
            _ => ApiError::validation_failed(message),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match &err {
            SchedulerError::NotFound { task_id } => ApiError::task_not_found(task_id),
            SchedulerError::AlreadyFinished { .. } => ApiError::state_conflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::task_not_found("t").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::state_conflict("done").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::invalid_input("x").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(ApiError::task_not_found("task_1")).unwrap();
        assert_eq!(json["code"], "TASK_NOT_FOUND");
        assert_eq!(json["message"], "Task task_1 not found");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_cycle_error_carries_nodes() {
        let err = ApiError::from(ValidationError::CycleDetected {
            nodes: vec!["a".to_string(), "b".to_string()],
        });
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.details.unwrap()["nodes"][1], "b");
    }

    #[test]
    fn test_scheduler_errors() {
        let err = ApiError::from(SchedulerError::AlreadyFinished {
            task_id: "t".to_string(),
        });
        assert_eq!(err.code, ErrorCode::StateConflict);
        assert_eq!(err.message, "Task t already finished");
    }
}

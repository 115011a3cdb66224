use crate::models::ValidationIssue;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("exam {0} not found")]
    ExamNotFound(i64),

    #[error("module {0} not found")]
    ModuleNotFound(i64),

    #[error("sub-topic '{0}' not found")]
    SubTopicNotFound(String),

    #[error("content point '{0}' not found")]
    ContentPointNotFound(String),

    #[error("question '{0}' not found")]
    QuestionNotFound(String),

    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("deletion requires confirmation")]
    Unconfirmed,

    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("topic has no questions")]
    NoQuestions,

    #[error("nothing to export")]
    NothingToExport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn from_engine(err: EngineError, request_id: impl Into<String>) -> Self {
        let (status, code) = match &err {
            EngineError::ExamNotFound(_)
            | EngineError::ModuleNotFound(_)
            | EngineError::SubTopicNotFound(_)
            | EngineError::ContentPointNotFound(_)
            | EngineError::QuestionNotFound(_)
            | EngineError::ResourceNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::Duplicate(_) => (StatusCode::CONFLICT, "CONFLICT"),
            EngineError::EmptyField(_) | EngineError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            EngineError::Unconfirmed => (StatusCode::PRECONDITION_REQUIRED, "CONFIRMATION_REQUIRED"),
            EngineError::MalformedDocument(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MALFORMED_DOCUMENT"),
            EngineError::NoQuestions => (StatusCode::CONFLICT, "NO_QUESTIONS"),
            EngineError::NothingToExport => (StatusCode::NOT_FOUND, "NOTHING_TO_EXPORT"),
        };
        let message = err.to_string();
        let details = match err {
            EngineError::Validation(issues) => issues
                .into_iter()
                .map(|i| ErrorDetail {
                    field: i.field,
                    issue: i.issue,
                })
                .collect(),
            _ => Vec::new(),
        };
        Self::new(status, code, message, request_id).with_details(details)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

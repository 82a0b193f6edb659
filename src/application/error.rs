use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::adapters::{database::DatabaseError, workers::WorkerError};

/// Diagnostic chain carried on error responses for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Queue(#[from] WorkerError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::Database(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Validation(_)
            | AppError::Database(
                DatabaseError::InvalidInput(_) | DatabaseError::InvalidIdentifier(_),
            ) => StatusCode::BAD_REQUEST,
            AppError::Database(DatabaseError::Duplicate { .. }) => StatusCode::CONFLICT,
            AppError::Database(
                DatabaseError::Connectivity(_)
                | DatabaseError::NotConfigured { .. }
                | DatabaseError::NotImplemented { .. },
            )
            | AppError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(DatabaseError::Query(_)) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Validation(message) => message.clone(),
            AppError::NotFound | AppError::Database(DatabaseError::NotFound) => {
                "Resource not found".to_string()
            }
            AppError::Database(DatabaseError::Duplicate { .. }) => {
                "Resource already exists".to_string()
            }
            AppError::Database(DatabaseError::InvalidInput(_) | DatabaseError::InvalidIdentifier(_)) => {
                "Request could not be processed".to_string()
            }
            AppError::Database(_) | AppError::Queue(_) => {
                "Service temporarily unavailable".to_string()
            }
            AppError::Unexpected(_) => "Unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();
        report.attach(&mut response);
        response
    }
}

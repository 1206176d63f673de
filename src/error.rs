use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Rejected by a model factory before anything was written
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Actor lacks the role or ownership required for the mutation
    #[error("forbidden")]
    Forbidden,

    /// Actor has no active membership in the conversation
    #[error("not a participant of this conversation")]
    NotAParticipant,

    #[error("not found")]
    NotFound,

    /// Operation is illegal for the current (e.g. tombstoned) state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation is not supported for this kind of conversation
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl AppError {
    /// Returns whether the caller may retry (e.g. pool exhaustion, dropped connection)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(msg) => {
                msg.contains("Timeout") || msg.contains("Closed") || msg.contains("connection")
            }
            AppError::Internal => true,
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden | AppError::NotAParticipant => 403,
            AppError::NotFound => 404,
            AppError::InvalidState(_)
            | AppError::InvalidOperation(_)
            | AppError::DuplicateOperation(_) => 409,
            AppError::Database(_) | AppError::Internal => 500,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }
}

use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to the shared error body
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Validation(_) => (kinds::VALIDATION_ERROR, error_codes::VALIDATION_FAILED),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden => (kinds::AUTHORIZATION_ERROR, error_codes::INSUFFICIENT_ROLE),
        AppError::NotAParticipant => (
            kinds::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_MEMBER,
        ),
        AppError::NotFound => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
        AppError::InvalidState(_) => (kinds::CONFLICT_ERROR, error_codes::INVALID_STATE),
        AppError::InvalidOperation(_) => (kinds::CONFLICT_ERROR, error_codes::INVALID_OPERATION),
        AppError::DuplicateOperation(_) => {
            (kinds::CONFLICT_ERROR, error_codes::DUPLICATE_OPERATION)
        }
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &err.to_string(),
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    HttpResponse::build(status).json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_participant_maps_to_member_code() {
        let (status, body) = map_error(&AppError::NotAParticipant);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, error_codes::NOT_CONVERSATION_MEMBER);
        assert_eq!(body.error, "Forbidden");
    }

    #[test]
    fn test_database_error_is_retryable_body() {
        let (status, body) = map_error(&AppError::Database("pool timed out".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_retryable());
    }
}

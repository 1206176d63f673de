//! Request extractors that enforce authentication at the type level

use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{bearer_token, JwtAuth};
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};

/// Authenticated caller, taken from the `Authorization: Bearer` JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<User, AppError> {
    let auth = req.app_data::<web::Data<JwtAuth>>().ok_or_else(|| {
        tracing::error!("JwtAuth is not registered as app data");
        AppError::Internal
    })?;
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AppError::Unauthorized)?;
    let id = auth.verify(token)?;
    Ok(User { id })
}

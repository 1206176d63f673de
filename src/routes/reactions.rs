use crate::{error::AppError, middleware::guards::User, state::AppState};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

/// POST /messages/{id}/reactions
/// Toggles the caller's reaction; the response says whether it is now present.
#[post("/messages/{id}/reactions")]
pub async fn toggle_reaction(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
    body: web::Json<ToggleReactionRequest>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .messages
        .toggle_reaction(message_id.into_inner(), user.id, &body.emoji)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ConversationFilter, ConversationKind},
    state::AppState,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateDirectRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default = "default_group_kind")]
    pub kind: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub participants: Vec<Uuid>,
}

fn default_group_kind() -> ConversationKind {
    ConversationKind::Group
}

#[derive(Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

/// POST /conversations/direct
/// Returns the existing conversation for the pair when there is one.
#[post("/conversations/direct")]
pub async fn create_direct(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateDirectRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .create_direct(user.id, body.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// POST /conversations/group
#[post("/conversations/group")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.kind == ConversationKind::Direct {
        return Err(AppError::BadRequest(
            "use /conversations/direct for direct conversations".into(),
        ));
    }
    let created = state
        .conversations
        .create_group(
            user.id,
            body.kind,
            &body.name,
            body.description,
            &body.participants,
        )
        .await?;
    Ok(HttpResponse::Created().json(created))
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
    filter: web::Query<ConversationFilter>,
) -> Result<HttpResponse, AppError> {
    let conversations = state
        .conversations
        .find_user_conversations(user.id, filter.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .get_conversation(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[post("/conversations/{id}/archive")]
pub async fn archive_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .archive(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[delete("/conversations/{id}/archive")]
pub async fn unarchive_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .conversations
        .unarchive(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// PUT /conversations/{id}/mute
/// Per-member setting, only affects the caller.
#[put("/conversations/{id}/mute")]
pub async fn mute_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<MuteRequest>,
) -> Result<HttpResponse, AppError> {
    let membership = state
        .conversations
        .set_muted(conversation_id.into_inner(), user.id, body.muted, body.until)
        .await?;
    Ok(HttpResponse::Ok().json(membership))
}

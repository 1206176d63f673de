//! Roster endpoints for group and channel conversations

use crate::{error::AppError, middleware::guards::User, models::MemberRole, state::AppState};
use actix_web::{delete, post, put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default = "default_member_role")]
    pub role: MemberRole,
}

fn default_member_role() -> MemberRole {
    MemberRole::Member
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: MemberRole,
}

#[derive(Deserialize)]
pub struct JoinRequestBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct ResolveJoinRequest {
    pub approve: bool,
}

/// POST /conversations/{id}/members
/// Re-adding a former member restores their history and receipts.
#[post("/conversations/{id}/members")]
pub async fn add_member(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, AppError> {
    let membership = state
        .conversations
        .add_participant(conversation_id.into_inner(), user.id, body.user_id, body.role)
        .await?;
    Ok(HttpResponse::Created().json(membership))
}

/// DELETE /conversations/{id}/members/{user_id}
/// Removing yourself is leaving.
#[delete("/conversations/{id}/members/{user_id}")]
pub async fn remove_member(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, member_id) = path.into_inner();
    state
        .conversations
        .remove_participant(conversation_id, user.id, member_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[put("/conversations/{id}/members/{user_id}/role")]
pub async fn update_member_role(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    user: User,
    body: web::Json<UpdateRoleRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, member_id) = path.into_inner();
    let membership = state
        .conversations
        .update_role(conversation_id, user.id, member_id, body.role)
        .await?;
    Ok(HttpResponse::Ok().json(membership))
}

#[post("/conversations/{id}/join-requests")]
pub async fn request_join(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: Option<web::Json<JoinRequestBody>>,
) -> Result<HttpResponse, AppError> {
    let message = body.and_then(|b| b.into_inner().message);
    let request = state
        .conversations
        .request_join(conversation_id.into_inner(), user.id, message)
        .await?;
    Ok(HttpResponse::Accepted().json(request))
}

/// POST /conversations/{id}/join-requests/{user_id}
/// Approve or reject; approval admits the requester as a member.
#[post("/conversations/{id}/join-requests/{user_id}")]
pub async fn resolve_join_request(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    user: User,
    body: web::Json<ResolveJoinRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, requester_id) = path.into_inner();
    match state
        .conversations
        .resolve_join_request(conversation_id, user.id, requester_id, body.approve)
        .await?
    {
        Some(membership) => Ok(HttpResponse::Ok().json(membership)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{MessageContent, RecipientState},
    services::{HistoryQuery, SendMessage},
    state::AppState,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    /// Client-generated key; a retried send with the same key is not stored twice
    #[serde(default)]
    pub client_message_id: Option<String>,
}

#[derive(Deserialize)]
pub struct DirectMessageRequest {
    pub recipient_id: Uuid,
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: MessageContent,
}

#[derive(Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub after_sequence: i64,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct ReadUpToRequest {
    pub up_to_message_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    #[default]
    Me,
    Everyone,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub scope: DeleteScope,
}

/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .messages
        .send(SendMessage {
            conversation_id: conversation_id.into_inner(),
            sender_id: user.id,
            content: body.content,
            reply_to: body.reply_to,
            client_message_id: body.client_message_id,
        })
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// POST /direct-messages
/// First message between two users opens their direct conversation.
#[post("/direct-messages")]
pub async fn send_direct_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<DirectMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .messages
        .send_direct(
            user.id,
            body.recipient_id,
            body.content,
            body.reply_to,
            body.client_message_id,
        )
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// GET /conversations/{id}/messages?before_sequence=&limit=
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .messages
        .history(conversation_id.into_inner(), user.id, query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /conversations/{id}/sync?after_sequence=&limit=
/// Catch-up after reconnect; returned messages are marked delivered.
#[get("/conversations/{id}/sync")]
pub async fn sync_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    query: web::Query<SyncQuery>,
) -> Result<HttpResponse, AppError> {
    let batch = state
        .messages
        .sync(
            conversation_id.into_inner(),
            user.id,
            query.after_sequence,
            query.limit,
        )
        .await?;
    Ok(HttpResponse::Ok().json(batch))
}

#[post("/conversations/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<ReadUpToRequest>,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .messages
        .mark_conversation_read(conversation_id.into_inner(), user.id, body.up_to_message_id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[put("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .edit(message_id.into_inner(), user.id, body.into_inner().content)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// DELETE /messages/{id}?scope=me|everyone
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
    query: web::Query<DeleteQuery>,
) -> Result<HttpResponse, AppError> {
    let message_id = message_id.into_inner();
    match query.scope {
        DeleteScope::Me => {
            state.messages.delete_for_me(message_id, user.id).await?;
            Ok(HttpResponse::NoContent().finish())
        }
        DeleteScope::Everyone => {
            let message = state
                .messages
                .delete_for_everyone(message_id, user.id)
                .await?;
            Ok(HttpResponse::Ok().json(message))
        }
    }
}

#[post("/messages/{id}/delivered")]
pub async fn mark_delivered(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let receipt = state
        .messages
        .mark_delivered(message_id.into_inner(), user.id)
        .await?;
    Ok(receipt_response(receipt))
}

#[post("/messages/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let receipt = state
        .messages
        .mark_read(message_id.into_inner(), user.id)
        .await?;
    Ok(receipt_response(receipt))
}

// 204 when the receipt was already at or past the requested state
fn receipt_response(receipt: Option<RecipientState>) -> HttpResponse {
    match receipt {
        Some(receipt) => HttpResponse::Ok().json(receipt),
        None => HttpResponse::NoContent().finish(),
    }
}

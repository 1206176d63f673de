use crate::error::{AppError, AppResult};
use crate::middleware::auth::bearer_token;
use crate::middleware::error_handling::map_error;
use crate::services::SendMessage;
use crate::state::AppState;
use crate::websocket::events::{ClientEvent, ServerEvent};
use crate::websocket::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, http::header, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// Reply for this socket only
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

pub struct WsSession {
    user_id: Uuid,
    connection_id: ConnectionId,
    hb: Instant,
    state: AppState,
    outbound: Option<UnboundedReceiver<String>>,
    inbound: Option<UnboundedSender<String>>,
}

impl WsSession {
    fn new(
        user_id: Uuid,
        connection_id: ConnectionId,
        outbound: UnboundedReceiver<String>,
        state: AppState,
    ) -> Self {
        Self {
            user_id,
            connection_id,
            hb: Instant::now(),
            state,
            outbound: Some(outbound),
            inbound: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = self.state.config.heartbeat_interval;
        let timeout = self.state.config.client_timeout;
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    user_id = %act.user_id,
                    connection_id = %act.connection_id,
                    "heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn beat(&mut self) {
        self.hb = Instant::now();
        let presence = self.state.presence.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            presence.touch(connection_id).await;
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "websocket session started"
        );
        self.hb(ctx);
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
        let addr = ctx.address();
        self.inbound = Some(spawn_dispatcher(
            self.state.clone(),
            self.user_id,
            move |payload| addr.do_send(TextMessage(payload)),
        ));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "websocket session stopped"
        );
        let state = self.state.clone();
        let user_id = self.user_id;
        let connection_id = self.connection_id;
        actix::spawn(async move {
            state.registry.remove_connection(user_id, connection_id).await;
            state.presence.on_disconnect(user_id, connection_id).await;
        });
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// Fan-out payloads queued in the registry for this connection
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, payload: String, ctx: &mut Self::Context) {
        ctx.text(payload);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(
            connection_id = %self.connection_id,
            "connection unregistered, closing socket"
        );
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.beat();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.beat();
            }
            Ok(ws::Message::Text(text)) => {
                let queued = self
                    .inbound
                    .as_ref()
                    .is_some_and(|tx| tx.send(text.to_string()).is_ok());
                if !queued {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        "inbound dispatcher gone, closing socket"
                    );
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!("binary frames are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Start the worker that handles one socket's inbound frames strictly in
/// arrival order. Each reply, if any, is handed to `reply` before the next
/// frame is read. The worker exits once the returned sender is dropped.
pub fn spawn_dispatcher<F>(state: AppState, user_id: Uuid, reply: F) -> UnboundedSender<String>
where
    F: Fn(String) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Some(event) = dispatch_frame(&state, user_id, &frame).await else {
                continue;
            };
            match event.to_payload() {
                Ok(payload) => reply(payload),
                Err(e) => tracing::warn!(error = %e, "failed to encode reply"),
            }
        }
    });
    tx
}

/// Parse and run one text frame; errors become error frames.
pub async fn dispatch_frame(state: &AppState, user_id: Uuid, frame: &str) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable client frame");
            return Some(ServerEvent::error("INVALID_REQUEST", e.to_string()));
        }
    };
    match handle_client_event(state, user_id, event).await {
        Ok(reply) => reply,
        Err(e) => Some(error_event(&e)),
    }
}

/// Error frame carrying the same code as the HTTP error body
pub fn error_event(err: &AppError) -> ServerEvent {
    let (_, body) = map_error(err);
    ServerEvent::error(&body.code, err.to_string())
}

/// Run one inbound event on behalf of `user_id`. The returned event, if any,
/// goes back to the originating socket only.
pub async fn handle_client_event(
    state: &AppState,
    user_id: Uuid,
    event: ClientEvent,
) -> AppResult<Option<ServerEvent>> {
    match event {
        ClientEvent::Typing { conversation_id } => {
            state
                .conversations
                .require_active_member(conversation_id, user_id)
                .await?;
            let event = ServerEvent::UserTyping {
                user_id,
                conversation_id,
            };
            state
                .fanout
                .notify(conversation_id, Some(user_id), &event)
                .await;
            Ok(None)
        }
        ClientEvent::StopTyping { conversation_id } => {
            state
                .conversations
                .require_active_member(conversation_id, user_id)
                .await?;
            let event = ServerEvent::UserStopTyping {
                user_id,
                conversation_id,
            };
            state
                .fanout
                .notify(conversation_id, Some(user_id), &event)
                .await;
            Ok(None)
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            reply_to,
            client_message_id,
        } => {
            let view = state
                .messages
                .send(SendMessage {
                    conversation_id,
                    sender_id: user_id,
                    content,
                    reply_to,
                    client_message_id,
                })
                .await?;
            Ok(Some(ServerEvent::ReceiveMessage {
                conversation_id,
                message: view,
            }))
        }
        ClientEvent::MessageDelivered { message_id } => {
            state.messages.mark_delivered(message_id, user_id).await?;
            Ok(None)
        }
        ClientEvent::MessagesRead {
            conversation_id,
            up_to_message_id,
        } => {
            state
                .messages
                .mark_conversation_read(conversation_id, user_id, up_to_message_id)
                .await?;
            Ok(None)
        }
        ClientEvent::Sync {
            conversation_id,
            after_sequence,
            limit,
        } => {
            let batch = state
                .messages
                .sync(conversation_id, user_id, after_sequence, limit)
                .await?;
            Ok(Some(ServerEvent::SyncBatch {
                conversation_id: batch.conversation_id,
                messages: batch.messages,
                next_cursor: batch.next_cursor,
                has_more: batch.has_more,
            }))
        }
        ClientEvent::Ping => Ok(Some(ServerEvent::Pong)),
    }
}

fn upgrade_token<'a>(req: &'a HttpRequest, params: &'a WsParams) -> Option<&'a str> {
    params.token.as_deref().filter(|t| !t.is_empty()).or_else(|| {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
    })
}

#[get("/ws")]
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    params: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = upgrade_token(&req, &params).ok_or(AppError::Unauthorized)?;
    let user_id = state.auth.verify(token)?;

    let (connection_id, rx) = state.registry.add_connection(user_id).await;
    let session = WsSession::new(user_id, connection_id, rx, state.get_ref().clone());
    let response = match ws::start(session, &req, stream) {
        Ok(response) => response,
        Err(e) => {
            state
                .registry
                .remove_connection(user_id, connection_id)
                .await;
            return Err(e);
        }
    };
    state.presence.on_connect(user_id, connection_id).await;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::MessageContent;

    fn state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "JWT_SECRET" => Some("session-test".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::in_memory(config)
    }

    #[tokio::test]
    async fn test_send_over_socket_replies_with_stored_message() {
        let state = state();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = state.conversations.create_direct(alice, bob).await.unwrap();
        let (_conn, mut bob_rx) = state.registry.add_connection(bob).await;

        let reply = handle_client_event(
            &state,
            alice,
            ClientEvent::SendMessage {
                conversation_id: conversation.id,
                content: MessageContent::text("hi"),
                reply_to: None,
                client_message_id: Some("c-1".into()),
            },
        )
        .await
        .unwrap();

        let Some(ServerEvent::ReceiveMessage { message, .. }) = reply else {
            panic!("expected receive_message reply");
        };
        assert_eq!(message.message.sequence_number, 1);

        let pushed: serde_json::Value = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["event"], "receive_message");
    }

    #[tokio::test]
    async fn test_typing_from_outsider_is_rejected() {
        let state = state();
        let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let conversation = state.conversations.create_direct(alice, bob).await.unwrap();

        let err = handle_client_event(
            &state,
            mallory,
            ClientEvent::Typing {
                conversation_id: conversation.id,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err, AppError::NotAParticipant);

        let ServerEvent::Error { code, .. } = error_event(&err) else {
            panic!("expected error frame");
        };
        assert_eq!(code, "NOT_CONVERSATION_MEMBER");
    }

    /// Verifies:
    /// - frames sent back to back are handled in arrival order
    /// - replies and bad-frame errors come back in that same order
    /// - the recipient sees the messages in the order they were typed
    #[tokio::test]
    async fn test_dispatcher_keeps_frame_order() {
        let state = state();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = state.conversations.create_direct(alice, bob).await.unwrap();
        let (_conn, mut bob_rx) = state.registry.add_connection(bob).await;

        let (reply_tx, mut replies) = mpsc::unbounded_channel();
        let inbound = spawn_dispatcher(state.clone(), alice, move |payload| {
            let _ = reply_tx.send(payload);
        });

        let texts: Vec<String> = (1..=5).map(|i| format!("m{i}")).collect();
        for (i, text) in texts.iter().enumerate() {
            let frame = serde_json::json!({
                "event": "send_message",
                "conversation_id": conversation.id,
                "content": { "text": text },
            });
            inbound.send(frame.to_string()).unwrap();
            if i == 2 {
                inbound.send("not json".to_string()).unwrap();
            }
        }
        drop(inbound);

        let mut kinds = Vec::new();
        let mut sequences = Vec::new();
        while let Some(payload) = replies.recv().await {
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            if value["event"] == "receive_message" {
                sequences.push(value["message"]["sequence_number"].as_i64().unwrap());
                kinds.push("reply");
            } else {
                assert_eq!(value["code"], "INVALID_REQUEST");
                kinds.push("error");
            }
        }
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert_eq!(kinds, vec!["reply", "reply", "reply", "error", "reply", "reply"]);

        let mut pushed = Vec::new();
        while let Ok(payload) = bob_rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            let text = value["message"]["content"]["text"].as_str().unwrap();
            pushed.push(text.to_string());
        }
        assert_eq!(pushed, texts);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let state = state();
        let reply = handle_client_event(&state, Uuid::new_v4(), ClientEvent::Ping)
            .await
            .unwrap();
        assert_eq!(reply, Some(ServerEvent::Pong));
    }
}

pub mod conversations;
pub mod members;
pub mod messages;
pub mod reactions;

use crate::websocket::session;
use actix_web::{web, HttpResponse};

/// Register every HTTP and WebSocket endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::create_direct)
        .service(conversations::create_group)
        .service(conversations::list_conversations)
        .service(conversations::get_conversation)
        .service(conversations::archive_conversation)
        .service(conversations::unarchive_conversation)
        .service(conversations::mute_conversation)
        .service(members::add_member)
        .service(members::remove_member)
        .service(members::update_member_role)
        .service(members::request_join)
        .service(members::resolve_join_request)
        .service(messages::send_message)
        .service(messages::send_direct_message)
        .service(messages::get_messages)
        .service(messages::sync_messages)
        .service(messages::mark_conversation_read)
        .service(messages::edit_message)
        .service(messages::delete_message)
        .service(messages::mark_delivered)
        .service(messages::mark_read)
        .service(reactions::toggle_reaction)
        .service(session::ws_index)
        .route("/health", web::get().to(|| async { HttpResponse::Ok().body("OK") }));
}

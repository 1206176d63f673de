//! REST surface exercised through actix's test service.

mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::{test_state, token_for};
use realtime_delivery_service::{routes, state::AppState};
use serde_json::{json, Value};
use uuid::Uuid;

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .app_data(web::Data::new($state.auth.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

fn bearer(state: &AppState, user: Uuid) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token_for(state, user)))
}

#[actix_rt::test]
async fn test_health() {
    let state = test_state();
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn test_requests_without_valid_token_are_rejected() {
    let state = test_state();
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/conversations").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/conversations")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

/// Verifies:
/// - direct creation, send and history round through HTTP
/// - outsiders get 403 with the member error code
#[actix_rt::test]
async fn test_direct_conversation_over_http() {
    let state = test_state();
    let app = app!(state);
    let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let req = test::TestRequest::post()
        .uri("/conversations/direct")
        .insert_header(bearer(&state, alice))
        .set_json(json!({ "user_id": bob }))
        .to_request();
    let conversation: Value = test::call_and_read_body_json(&app, req).await;
    let conversation_id = conversation["id"].as_str().unwrap().to_string();
    assert_eq!(conversation["kind"], "direct");

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/messages"))
        .insert_header(bearer(&state, alice))
        .set_json(json!({ "content": { "text": "hi" }, "client_message_id": "c-1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Value = test::read_body_json(resp).await;
    assert_eq!(sent["sequence_number"], 1);
    let message_id = sent["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{conversation_id}/messages"))
        .insert_header(bearer(&state, bob))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.as_array().unwrap().len(), 1);

    let req = test::TestRequest::post()
        .uri(&format!("/messages/{message_id}/read"))
        .insert_header(bearer(&state, bob))
        .to_request();
    let receipt: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(receipt["status"], "read");

    let req = test::TestRequest::post()
        .uri(&format!("/messages/{message_id}/delivered"))
        .insert_header(bearer(&state, bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{conversation_id}"))
        .insert_header(bearer(&state, mallory))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NOT_CONVERSATION_MEMBER");
}

#[actix_rt::test]
async fn test_delete_scopes_over_http() {
    let state = test_state();
    let app = app!(state);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = state.conversations.create_direct(alice, bob).await.unwrap();
    let sent = common::send_text(&state, conversation.id, alice, "oops").await;
    let uri = format!("/messages/{}?scope=everyone", sent.message.id);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(&state, bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(&state, alice))
        .to_request();
    let deleted: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(deleted["deleted_for_everyone"], true);

    let req = test::TestRequest::delete()
        .uri(&format!("/messages/{}", sent.message.id))
        .insert_header(bearer(&state, bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[actix_rt::test]
async fn test_group_roster_over_http() {
    let state = test_state();
    let app = app!(state);
    let (admin, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let req = test::TestRequest::post()
        .uri("/conversations/group")
        .insert_header(bearer(&state, admin))
        .set_json(json!({ "name": "crew", "participants": [bob] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let conversation_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["members"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/members"))
        .insert_header(bearer(&state, bob))
        .set_json(json!({ "user_id": carol }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/members"))
        .insert_header(bearer(&state, admin))
        .set_json(json!({ "user_id": carol, "role": "moderator" }))
        .to_request();
    let member: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(member["role"], "moderator");

    let req = test::TestRequest::delete()
        .uri(&format!("/conversations/{conversation_id}/members/{bob}"))
        .insert_header(bearer(&state, carol))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/join-requests"))
        .insert_header(bearer(&state, bob))
        .set_json(json!({ "message": "sorry" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{conversation_id}/join-requests/{bob}"))
        .insert_header(bearer(&state, admin))
        .set_json(json!({ "approve": false }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[actix_rt::test]
async fn test_reaction_and_sync_over_http() {
    let state = test_state();
    let app = app!(state);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = state.conversations.create_direct(alice, bob).await.unwrap();
    let sent = common::send_text(&state, conversation.id, alice, "sync me").await;

    let req = test::TestRequest::post()
        .uri(&format!("/messages/{}/reactions", sent.message.id))
        .insert_header(bearer(&state, bob))
        .set_json(json!({ "emoji": "🎉" }))
        .to_request();
    let outcome: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(outcome["active"], true);

    let req = test::TestRequest::get()
        .uri(&format!(
            "/conversations/{}/sync?after_sequence=0",
            conversation.id
        ))
        .insert_header(bearer(&state, bob))
        .to_request();
    let batch: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(batch["next_cursor"], 1);
    assert_eq!(batch["has_more"], false);
    assert_eq!(batch["messages"][0]["recipients"][0]["status"], "delivered");
}

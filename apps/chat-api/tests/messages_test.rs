mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;

async fn say(ctx: &common::TestContext, sender: &str, frame: Value) {
    ctx.state
        .router
        .handle_frame(sender, &frame.to_string())
        .await;
}

#[tokio::test]
async fn general_history_is_oldest_first_and_limited() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let (_, token) = ctx.user("alice").await;

    for i in 0..5 {
        say(&ctx, "alice", serde_json::json!({ "content": format!("m{i}") })).await;
    }

    let resp = server
        .get("/api/messages?limit=3")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let contents: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);
    assert_eq!(body[0]["sender"], "alice");
    assert_eq!(body[0]["isPrivate"], false);
}

#[tokio::test]
async fn private_history_is_shared_by_both_participants() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let (_, alice_token) = ctx.user("alice").await;
    let (_, bob_token) = ctx.user("bob").await;
    let (_, carol_token) = ctx.user("carol").await;

    say(
        &ctx,
        "alice",
        serde_json::json!({ "type": "private", "recipient": "bob", "content": "ping" }),
    )
    .await;
    say(
        &ctx,
        "bob",
        serde_json::json!({ "type": "private", "recipient": "alice", "content": "pong" }),
    )
    .await;

    let from_alice: Value = server
        .get("/api/messages/private/bob")
        .add_header(AUTHORIZATION, format!("Bearer {alice_token}"))
        .await
        .json();
    let from_bob: Value = server
        .get("/api/messages/private/alice")
        .add_header(AUTHORIZATION, format!("Bearer {bob_token}"))
        .await
        .json();

    assert_eq!(from_alice, from_bob);
    assert_eq!(from_alice[0]["content"], "ping");
    assert_eq!(from_alice[0]["recipient"], "bob");
    assert_eq!(from_alice[1]["recipient"], "alice");
    assert_eq!(from_alice[1]["isPrivate"], true);

    let outsider: Value = server
        .get("/api/messages/private/alice")
        .add_header(AUTHORIZATION, format!("Bearer {carol_token}"))
        .await
        .json();
    assert_eq!(outsider, serde_json::json!([]));
}

#[tokio::test]
async fn private_rooms_cannot_be_read_through_room_query() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let (_, token) = ctx.user("carol").await;

    let resp = server
        .get("/api/messages?room=private_alice_bob")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_requires_auth() {
    let (app, _ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    server
        .get("/api/messages")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn private_history_excludes_pairs_sharing_a_channel_key() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    ctx.user("a_b").await;
    ctx.user("c").await;
    let (_, a_token) = ctx.user("a").await;
    ctx.user("b_c").await;

    // (a_b, c) and (a, b_c) both key to private_a_b_c.
    say(
        &ctx,
        "a_b",
        serde_json::json!({ "type": "private", "recipient": "c", "content": "secret for c" }),
    )
    .await;
    say(
        &ctx,
        "b_c",
        serde_json::json!({ "type": "private", "recipient": "a", "content": "hi a" }),
    )
    .await;

    let body: Value = server
        .get("/api/messages/private/b_c")
        .add_header(AUTHORIZATION, format!("Bearer {a_token}"))
        .await
        .json();
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hi a");
    assert_eq!(messages[0]["sender"], "b_c");
}

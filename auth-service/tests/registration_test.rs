//! Invite-only registration and email verification.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};

#[tokio::test]
async fn invited_user_registers_verifies_and_signs_in() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;

    let response = app
        .send(TestApp::authed(
            &root,
            Method::POST,
            "/auth/invite",
            Some(serde_json::json!({ "email": "alice@example.com" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    root.rotate(&response);
    let invite_id = body_json(response).await["invite_id"]
        .as_str()
        .expect("invite id")
        .to_string();

    let invite = app.last_email("invite.html");
    assert_eq!(invite.to, "alice@example.com");
    assert_eq!(invite.data.id, invite_id);

    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/register",
            Some(serde_json::json!({
                "name": "Alice",
                "email": "alice@example.com",
                "password": "wonderland-42",
                "confirm_password": "wonderland-42",
                "invite_id": invite.data.id,
                "invite_token": invite.data.token,
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let user = body_json(response).await;
    assert_eq!(user["email"], "alice@example.com");

    // Unverified accounts cannot sign in yet
    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/login",
            Some(serde_json::json!({
                "email": "alice@example.com",
                "password": "wonderland-42",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let verify = app.last_email("verify.html");
    let link = format!(
        "/auth/verify?id={}&token={}",
        verify.data.id,
        urlencoding::encode(&verify.data.token)
    );
    let response = app.send(TestApp::json(Method::GET, &link, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Verification links are single-use
    let response = app.send(TestApp::json(Method::GET, &link, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let session = app.login("alice@example.com", "wonderland-42").await;
    assert_eq!(session.user_id, user["id"].as_str().expect("user id"));
}

#[tokio::test]
async fn invite_is_single_use() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    app.onboard(&mut root, "bob@example.com", "builder-123").await;

    let invite = app.last_email("invite.html");
    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/register",
            Some(serde_json::json!({
                "name": "Mallory",
                "email": "bob@example.com",
                "password": "intruder-123",
                "confirm_password": "intruder-123",
                "invite_id": invite.data.id,
                "invite_token": invite.data.token,
            })),
        ))
        .await;
    assert_ne!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn password_mismatch_does_not_consume_invite() {
    let app = TestApp::spawn().await;
    let root = app.login_root().await;

    let response = app
        .send(TestApp::authed(
            &root,
            Method::POST,
            "/auth/invite",
            Some(serde_json::json!({ "email": "carol@example.com" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let invite = app.last_email("invite.html");

    let register = |confirm: &str| {
        TestApp::json(
            Method::POST,
            "/auth/register",
            Some(serde_json::json!({
                "name": "Carol",
                "email": "carol@example.com",
                "password": "carol-secret-1",
                "confirm_password": confirm,
                "invite_id": invite.data.id,
                "invite_token": invite.data.token,
            })),
        )
    };

    let response = app.send(register("something-else")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(register("carol-secret-1")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn forgot_password_flow_resets_credentials() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    app.onboard(&mut root, "dave@example.com", "first-password").await;

    // Unknown addresses get the same answer
    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/forgot",
            Some(serde_json::json!({ "email": "nobody@example.com" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(app.email.last("forgot.html").is_none());

    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/forgot",
            Some(serde_json::json!({ "email": "dave@example.com" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let forgot = app.last_email("forgot.html");
    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/reset",
            Some(serde_json::json!({
                "id": forgot.data.id,
                "token": forgot.data.token,
                "password": "second-password",
                "confirm_password": "second-password",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(TestApp::json(
            Method::POST,
            "/auth/login",
            Some(serde_json::json!({
                "email": "dave@example.com",
                "password": "first-password",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.login("dave@example.com", "second-password").await;
}

//! Authorization-code grant against a registered client.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use auth_service::services::AuthStore;
use common::{body_json, location, Session, TestApp, ROOT_EMAIL};
use service_core::utils::signer::verify_access_token;

const REDIRECT_URI: &str = "https://client.example.com/callback";

async fn register_client(app: &TestApp, session: &mut Session) -> (String, String) {
    let response = app
        .send(TestApp::authed(
            session,
            Method::POST,
            "/oauth/application/",
            Some(serde_json::json!({
                "name": "Dashboard",
                "redirect_uri": REDIRECT_URI,
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    session.rotate(&response);

    let body = body_json(response).await;
    (
        body["application"]["client_id"]
            .as_str()
            .expect("client id")
            .to_string(),
        body["client_secret"].as_str().expect("secret").to_string(),
    )
}

async fn authorize(app: &TestApp, session: &Session, client_id: &str) -> String {
    let response = app
        .send(TestApp::authed(
            session,
            Method::GET,
            &format!(
                "/oauth/authorize?client_id={}&response_type=code&state=xyz",
                client_id
            ),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let target = reqwest::Url::parse(&location(&response)).expect("absolute redirect");
    assert!(target.as_str().starts_with(REDIRECT_URI));
    let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    pairs
        .into_iter()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v)
        .expect("code parameter")
}

fn token_request(fields: &[(&str, &str)]) -> Request<Body> {
    let body = serde_urlencoded::to_string(fields).expect("form encodes");
    Request::builder()
        .method(Method::POST)
        .uri("/oauth/token")
        .header("x-forwarded-for", "203.0.113.7")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("valid request")
}

#[tokio::test]
async fn authorization_code_is_exchanged_once() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    let (client_id, secret) = register_client(&app, &mut root).await;
    let code = authorize(&app, &root, &client_id).await;

    let exchange = || {
        token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
        ])
    };

    let response = app.send(exchange()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 900);

    let claims = verify_access_token(
        tokens["access_token"].as_str().expect("access token"),
        app.state.key_provider.as_ref(),
    )
    .await
    .expect("token verifies against the published key");
    assert_eq!(claims.sub, root.user_id);
    assert_eq!(claims.client_id.as_deref(), Some(client_id.as_str()));

    let response = app.send(exchange()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // The refresh token keeps working after the code is spent
    let refresh = tokens["refresh_token"].as_str().expect("refresh token");
    let response = app
        .send(token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("refresh_token", refresh),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_client_secret_is_invalid_client() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    let (client_id, _secret) = register_client(&app, &mut root).await;
    let code = authorize(&app, &root, &client_id).await;

    let response = app
        .send(token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", client_id.as_str()),
            ("client_secret", "not-the-secret"),
            ("code", code.as_str()),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn unknown_grant_type_is_rejected() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    let (client_id, secret) = register_client(&app, &mut root).await;

    let response = app
        .send(token_request(&[
            ("grant_type", "password"),
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn mismatched_redirect_uri_is_refused() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    let (client_id, _) = register_client(&app, &mut root).await;

    let response = app
        .send(TestApp::authed(
            &root,
            Method::GET,
            &format!(
                "/oauth/authorize?client_id={}&redirect_uri={}",
                client_id,
                urlencoding::encode("https://evil.example.com/cb")
            ),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_users_cannot_see_applications() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    register_client(&app, &mut root).await;
    app.onboard(&mut root, "erin@example.com", "erin-password").await;

    let erin = app.login("erin@example.com", "erin-password").await;
    let response = app
        .send(TestApp::authed(&erin, Method::GET, "/oauth/application/", None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn deleting_an_application_revokes_its_grants() {
    let app = TestApp::spawn().await;
    let mut root = app.login_root().await;
    let root_id = app
        .store
        .find_user_by_email(ROOT_EMAIL)
        .await
        .unwrap()
        .expect("root user")
        .id;

    let response = app
        .send(TestApp::authed(
            &root,
            Method::POST,
            "/oauth/application/",
            Some(serde_json::json!({
                "name": "Reports",
                "redirect_uri": REDIRECT_URI,
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    root.rotate(&response);
    let app_id = body_json(response).await["application"]["id"]
        .as_str()
        .expect("application id")
        .to_string();
    let resource = format!("/oauth/application/{}", app_id);

    let granted = |perms: &[auth_service::models::Permission]| {
        perms.iter().any(|p| p.resource == resource)
    };
    assert!(granted(&app.store.list_user_permissions(root_id).await.unwrap()));

    let response = app
        .send(TestApp::authed(
            &root,
            Method::DELETE,
            &format!("/oauth/application/{}", app_id),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    root.rotate(&response);

    assert!(!granted(&app.store.list_user_permissions(root_id).await.unwrap()));
    let rules = app.state.access.rules_for(root_id).await.unwrap();
    assert!(rules.iter().all(|r| r.obj != resource));
}

mod common;

use axum::http::{header, Method, StatusCode};
use common::{test_config, TestApp, ROOT_EMAIL};

#[tokio::test]
async fn login_attempts_are_limited_per_ip() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 2;
    config.rate_limit.login_window_seconds = 3600;
    let app = TestApp::spawn_with(config).await;

    let attempt = || {
        TestApp::json(
            Method::POST,
            "/auth/login",
            Some(serde_json::json!({ "email": ROOT_EMAIL, "password": "guess" })),
        )
    };

    for _ in 0..2 {
        let response = app.send(attempt()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.send(attempt()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Read-only pages are not on the login budget
    let response = app.send(TestApp::json(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

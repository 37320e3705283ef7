// ============================
// crates/backend-lib/tests/auth_flow_tests.rs
// ============================
//! End-to-end magic-link flows through the router.

mod common;

use axum::http::{header::LOCATION, StatusCode};
use common::{auth_cookie, json_body, setup_test_app};
use grimstack_backend::storage::{UserRepository, UserUpdate};
use grimstack_common::Role;
use serde_json::json;
use std::time::Duration;

async fn signup(app: &common::TestApp, email: &str, username: &str) -> String {
    let response = app
        .post_json("/auth", json!({ "email": email, "username": username }))
        .await;
    assert_eq!(response.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
    app.store
        .find_by_email(email)
        .await
        .unwrap()
        .and_then(|user| user.verifier)
        .unwrap()
}

#[tokio::test]
async fn test_signup_login_and_replay() {
    let app = setup_test_app();

    let response = app
        .post_json("/auth", json!({ "email": "a@x.com", "username": "alice" }))
        .await;
    assert_eq!(response.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["msg"], "Thanks alice, we sent you an authentication email.");

    let verifier = app
        .store
        .find_by_email("a@x.com")
        .await
        .unwrap()
        .and_then(|user| user.verifier)
        .unwrap();

    let response = app.get(&format!("/auth/{verifier}"), None).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[LOCATION], "/");
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("Auth="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=604800"));

    let user = app.store.find_by_email("a@x.com").await.unwrap().unwrap();
    assert!(user.is_verified());
    assert!(user.verifier.is_none());

    let response = app.get(&format!("/auth/{verifier}"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_only_latest_link_works() {
    let app = setup_test_app();
    let first = signup(&app, "a@x.com", "alice").await;
    let second = signup(&app, "a@x.com", "alice").await;
    assert_ne!(first, second);

    let response = app.get(&format!("/auth/{first}"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app.get(&format!("/auth/{second}"), None).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
}

#[tokio::test]
async fn test_bad_input_and_rate_limit() {
    let app = setup_test_app();

    let response = app
        .post_json("/auth", json!({ "email": "nope", "username": "alice" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["msg"], "invalid email, could not authorize user");
    assert_eq!(body["ok"], false);

    let response = app
        .post_json("/auth", json!({ "email": "a@x.com", "username": "no spaces" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.post_json("/auth", json!({ "email": "a@x.com" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    for _ in 0..3 {
        signup(&app, "a@x.com", "alice").await;
    }
    let response = app
        .post_json("/auth", json!({ "email": "a@x.com", "username": "alice" }))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["msg"], "too many auth requests/emails, wait a bit and try again");
}

#[tokio::test]
async fn test_check_username() {
    let app = setup_test_app();
    signup(&app, "a@x.com", "alice").await;

    let body = json_body(app.get("/check-username/alice", None).await).await;
    assert_eq!(body["ok"], false);
    let body = json_body(app.get("/check-username/bob", None).await).await;
    assert_eq!(body["ok"], true);
    let body = json_body(app.get("/check-username/x", None).await).await;
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_gated_routes_and_logout() {
    let app = setup_test_app();
    let verifier = signup(&app, "a@x.com", "alice").await;
    let response = app.get(&format!("/auth/{verifier}"), None).await;
    let token = auth_cookie(&response).unwrap();

    assert_eq!(
        app.get("/subscribe-toggle", None).await.status(),
        StatusCode::UNAUTHORIZED
    );
    let response = app.get("/subscribe-toggle", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
    assert_eq!(json_body(response).await["msg"], "you are now subscribed");

    assert_eq!(
        app.get("/admin", Some(&token)).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let user = app.store.find_by_email("a@x.com").await.unwrap().unwrap();
    app.store
        .update(&user.key, UserUpdate::GrantRole(Role::Admin))
        .await
        .unwrap();
    let response = app.get("/admin", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["roles"], json!(["verified", "admin"]));

    let response = app.get("/auth/logout", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cleared.starts_with("Auth=;"));
    assert!(cleared.contains("Max-Age=1"));

    // marker removal runs in the background
    for _ in 0..50 {
        let user = app.store.find_by_key(&user.key).await.unwrap().unwrap();
        if user.sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        app.get("/subscribe-toggle", Some(&token)).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_admin_is_sent_to_admin_page() {
    let app = setup_test_app();
    let verifier = signup(&app, "root@x.com", "root").await;
    let user = app.store.find_by_email("root@x.com").await.unwrap().unwrap();
    app.store
        .update(&user.key, UserUpdate::GrantRole(Role::Admin))
        .await
        .unwrap();

    let response = app.get(&format!("/auth/{verifier}"), None).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[LOCATION], "/admin");
}

#[tokio::test]
async fn test_logout_without_session_still_clears_cookie() {
    let app = setup_test_app();
    let response = app.get("/auth/logout", Some("garbage")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("set-cookie"));
}

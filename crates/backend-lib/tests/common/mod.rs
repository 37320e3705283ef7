#![allow(dead_code)]

//! Shared setup for the HTTP-level tests.
//!
//! Builds a full [`AppState`] over an in-memory store with the log mailer, so
//! tests can drive the real router and read back what the store holds.

use axum::{
    body::{to_bytes, Body},
    http::{header::COOKIE, Method, Request},
    response::Response,
    Router,
};
use grimstack_backend::{
    config::{Secret, Settings},
    create_router,
    mail::{LogMailer, MailQueue},
    storage::{MemoryStore, RateLimitStore, UserRepository},
    AppState,
};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
    pub router: Router,
}

pub fn settings() -> Settings {
    Settings {
        token_secret: Secret::new("0123456789abcdef0123456789abcdef"),
        verifier_secret: Secret::new("fedcba9876543210fedcba9876543210"),
        ..Settings::default()
    }
}

/// State and router over any store
pub fn app_over<S>(store: Arc<S>, settings: Settings) -> (Arc<AppState>, Router)
where
    S: UserRepository + RateLimitStore + 'static,
{
    let (mail, _worker) = MailQueue::start(Arc::new(LogMailer), 16);
    let state = Arc::new(AppState::new(settings, store, mail).unwrap());
    let router = create_router(state.clone());
    (state, router)
}

pub fn setup_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let (state, router) = app_over(store.clone(), settings());
    TestApp {
        store,
        state,
        router,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = cookie {
            builder = builder.header(COOKIE, format!("Auth={token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            },
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        self.request(Method::GET, uri, cookie, None).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.request(Method::POST, uri, None, Some(body)).await
    }
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Token value of the `Auth` cookie set by `response`
pub fn auth_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.strip_prefix("Auth="))
        .and_then(|rest| rest.split(';').next())
        .map(str::to_string)
}

// ============================
// crates/backend-lib/src/router.rs
// ============================
//! HTTP router.
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::auth;
use crate::middleware::{gate, Gate};
use crate::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let members = Router::new()
        .route("/subscribe-toggle", get(auth::subscribe_toggle))
        .route_layer(from_fn_with_state(Gate::auth(state.clone()), gate));

    let admins = Router::new()
        .route("/admin", get(auth::admin))
        .route_layer(from_fn_with_state(Gate::admin(state.clone()), gate));

    Router::new()
        .route("/check-username/{username}", get(auth::check_username))
        .route("/auth", post(auth::request_auth))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/{verifier}", get(auth::consume_verifier))
        .merge(members)
        .merge(admins)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

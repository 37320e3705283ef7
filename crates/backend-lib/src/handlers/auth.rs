// ============================
// crates/backend-lib/src/handlers/auth.rs
// ============================
//! Auth endpoints.
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use grimstack_common::{AdminProfile, AuthRequest, AuthResponse, UsernameAvailability};
use std::sync::Arc;

use crate::auth::{clear_session_cookie, extract_credential, session_cookie};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::storage::{with_timeout, UserUpdate};
use crate::AppState;

/// `GET /check-username/{username}`
pub async fn check_username(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> AppResult<Json<UsernameAvailability>> {
    let ok = state.verifier.is_username_available(&username).await?;
    Ok(Json(UsernameAvailability { ok }))
}

/// `POST /auth`: start signup or login by mailing a magic link
pub async fn request_auth(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let Json(body) = body.map_err(|e| {
        tracing::debug!(error = %e, "bad auth request body");
        AppError::InvalidInput("bad request, could not authorize user".to_string())
    })?;

    let user = state
        .verifier
        .request(&body.email, &body.username, Utc::now())
        .await?;

    Ok((
        StatusCode::NON_AUTHORITATIVE_INFORMATION,
        Json(AuthResponse::ok(format!(
            "Thanks {}, we sent you an authentication email.",
            user.username
        ))),
    ))
}

/// `GET /auth/{verifier}`: consume a magic link and start a session
pub async fn consume_verifier(
    State(state): State<Arc<AppState>>,
    Path(verifier): Path<String>,
) -> AppResult<Response> {
    let (user, token) = state.verifier.consume(&verifier, Utc::now()).await?;
    let cookie = session_cookie(&state.settings, &token)?;
    let target = if user.is_admin() { "/admin" } else { "/" };

    Ok((
        StatusCode::MOVED_PERMANENTLY,
        [(LOCATION, target.to_string())],
        [(SET_COOKIE, cookie)],
    )
        .into_response())
}

/// `GET /auth/logout`: clear the cookie now, drop the session marker later
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_credential(&headers) {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = sessions.logout(&token, Utc::now()).await {
                tracing::debug!(error = %e, "logout could not remove session marker");
            }
        });
    }

    (
        StatusCode::OK,
        [(SET_COOKIE, clear_session_cookie(&state.settings))],
    )
        .into_response()
}

/// `GET /subscribe-toggle`
pub async fn subscribe_toggle(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let user = with_timeout(
        state.settings.store_timeout(),
        state.users.update(&user.key, UserUpdate::ToggleSubscriber),
    )
    .await?;

    let msg = if user.subscriber {
        "you are now subscribed"
    } else {
        "you are no longer subscribed"
    };
    Ok((StatusCode::NON_AUTHORITATIVE_INFORMATION, Json(AuthResponse::ok(msg))))
}

/// `GET /admin`
pub async fn admin(Extension(AuthUser(user)): Extension<AuthUser>) -> Json<AdminProfile> {
    Json(AdminProfile {
        ok: true,
        username: user.username,
        roles: user.roles.to_vec(),
    })
}

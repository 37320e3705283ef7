// ============================
// crates/backend-lib/src/middleware/auth_gate.rs
// ============================
//! Session and role gates for protected routes.
//!
//! ```ignore
//! Router::new()
//!     .route("/admin", get(admin))
//!     .route_layer(from_fn_with_state(Gate::admin(state.clone()), gate))
//! ```
use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use grimstack_common::Role;
use metrics::counter;
use std::sync::Arc;

use crate::auth::{extract_credential, session_cookie, Authenticated, RoleSet};
use crate::error::{AppError, AppResult};
use crate::metrics::GATE_REJECTED;
use crate::storage::User;
use crate::AppState;

/// The authenticated user, inserted into request extensions by [`gate`]
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// What a protected route requires of the caller
#[derive(Clone)]
pub struct Gate {
    state: Arc<AppState>,
    required: RoleSet,
}

impl Gate {
    /// Any current session
    pub fn auth(state: Arc<AppState>) -> Self {
        Self::roles(state, &[])
    }

    /// A current session held by an admin
    pub fn admin(state: Arc<AppState>) -> Self {
        Self::roles(state, &[Role::Admin])
    }

    /// A current session whose user holds every role in `required`
    pub fn roles(state: Arc<AppState>, required: &[Role]) -> Self {
        Self {
            state,
            required: RoleSet::of(required),
        }
    }

    async fn check(&self, credential: Option<String>) -> AppResult<Authenticated> {
        let token = credential.ok_or_else(|| {
            tracing::debug!("no session credential");
            AppError::Unauthorized
        })?;

        let auth = self.state.sessions.authenticate(&token, Utc::now()).await?;
        if !auth.user.has_roles(self.required) {
            tracing::debug!(user = %auth.user.username, "missing required role");
            return Err(AppError::Unauthorized);
        }
        Ok(auth)
    }
}

/// Reject the request unless the gate admits it; attach a renewed session
/// cookie to the response when the session was renewed.
pub async fn gate(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let credential = extract_credential(request.headers());
    let auth = match gate.check(credential).await {
        Ok(auth) => auth,
        Err(e) => {
            counter!(GATE_REJECTED).increment(1);
            return e.into_response();
        },
    };

    request.extensions_mut().insert(AuthUser(auth.user));
    let mut response = next.run(request).await;

    if let Some(token) = auth.renewed {
        match session_cookie(&gate.state.settings, &token) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            },
            Err(e) => tracing::warn!(error = %e, "could not set renewed session cookie"),
        }
    }
    response
}

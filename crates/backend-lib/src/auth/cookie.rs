// ============================
// crates/backend-lib/src/auth/cookie.rs
// ============================
//! The `Auth` session cookie.
use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

use crate::config::Settings;
use crate::error::{AppError, AppResult};

pub const SESSION_COOKIE_NAME: &str = "Auth";

/// `Set-Cookie` value carrying a session token
pub fn session_cookie(settings: &Settings, token: &str) -> AppResult<HeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Max-Age={}",
        settings.session_ttl_secs
    );
    if !settings.dev_mode {
        cookie.push_str(&format!("; Domain={}; SameSite=Strict; Secure", settings.domain));
    }
    HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(format!("session cookie: {e}")))
}

/// `Set-Cookie` value that makes the browser drop the session cookie
pub fn clear_session_cookie(settings: &Settings) -> HeaderValue {
    if settings.dev_mode {
        return HeaderValue::from_static("Auth=; Path=/; HttpOnly; Max-Age=1");
    }
    let cookie = format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=1; Domain={}; SameSite=Strict; Secure",
        settings.domain
    );
    HeaderValue::from_str(&cookie)
        .unwrap_or_else(|_| HeaderValue::from_static("Auth=; Path=/; HttpOnly; Max-Age=1"))
}

/// Session token from the `Auth` cookie, or else a bearer token
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers).or_else(|| extract_bearer(headers))
}

fn extract_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
